use callscope_types::PTime;
use std::sync::atomic::{AtomicU64, Ordering};

/// Source of "now" for exchange start times and the fallback freshness window.
pub trait Clock: Send + Sync {
    fn now(&self) -> PTime;
}

/// Process-relative wall clock.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> PTime {
        PTime::now()
    }
}

/// Hand-driven clock for embedding hosts with their own notion of time, and tests.
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(start_ms),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.now_ms.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> PTime {
        PTime::from_millis(self.now_ms.load(Ordering::SeqCst))
    }
}
