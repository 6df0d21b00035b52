use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use callscope_runtime::Inspector;
use callscope_types::{CallRecord, ServerStream, StreamEvent, StreamEventKind, StreamListener};
use parking_lot::Mutex;
use tracing::{debug, trace};

const RELAYED_KINDS: [StreamEventKind; 3] = [
    StreamEventKind::Data,
    StreamEventKind::Status,
    StreamEventKind::Error,
];

/// Instrumented version of a server-streaming call handle.
///
/// Every event of the wrapped stream is relayed to the listener the host
/// attached for its kind. On the way through, each data item is emitted,
/// then exactly one terminal message: EOF for a zero status, or the error.
/// Anything arriving after the terminal message is relayed but not emitted.
pub struct InterceptedStream {
    inner: Arc<dyn ServerStream>,
    shared: Arc<StreamShared>,
}

struct StreamShared {
    method: String,
    inspector: Inspector,
    listeners: Mutex<BTreeMap<StreamEventKind, StreamListener>>,
    terminated: AtomicBool,
}

impl InterceptedStream {
    pub fn new(method: &str, inner: Arc<dyn ServerStream>, inspector: Inspector) -> Self {
        let shared = Arc::new(StreamShared {
            method: String::from(method),
            inspector,
            listeners: Mutex::new(BTreeMap::new()),
            terminated: AtomicBool::new(false),
        });
        for kind in RELAYED_KINDS {
            let shared = Arc::clone(&shared);
            inner.on(
                kind,
                Box::new(move |event: &StreamEvent| shared.observe(event)),
            );
        }
        Self { inner, shared }
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.terminated.load(Ordering::Acquire)
    }
}

impl StreamShared {
    fn observe(&self, event: &StreamEvent) {
        if let Some(record) = self.record_for(event) {
            self.inspector.emit(&record);
        }
        self.relay(event);
    }

    fn record_for(&self, event: &StreamEvent) -> Option<CallRecord> {
        match event {
            StreamEvent::Data(response) => {
                if self.terminated.load(Ordering::Acquire) {
                    trace!(method = %self.method, "data after terminal message; not emitted");
                    return None;
                }
                Some(CallRecord::stream_data(
                    self.method.clone(),
                    response.to_object(),
                ))
            }
            StreamEvent::Status(status) if status.code == 0 => {
                self.terminate()?;
                debug!(method = %self.method, "stream finished");
                Some(CallRecord::stream_eof(self.method.clone()))
            }
            StreamEvent::Status(status) => {
                trace!(method = %self.method, code = status.code, "non-zero status; awaiting error");
                None
            }
            StreamEvent::Error(error) if error.code != 0 => {
                self.terminate()?;
                debug!(method = %self.method, code = error.code, "stream failed");
                Some(CallRecord::stream_error(self.method.clone(), error.clone()))
            }
            StreamEvent::Error(_) => None,
        }
    }

    /// `Some` only for the first caller.
    fn terminate(&self) -> Option<()> {
        (!self.terminated.swap(true, Ordering::AcqRel)).then_some(())
    }

    fn relay(&self, event: &StreamEvent) {
        let kind = event.kind();
        let taken = self.listeners.lock().remove(&kind);
        if let Some(mut listener) = taken {
            listener(event);
            // A listener attached while this one ran replaces it.
            self.listeners.lock().entry(kind).or_insert(listener);
        }
    }
}

impl ServerStream for InterceptedStream {
    fn on(&self, kind: StreamEventKind, listener: StreamListener) {
        self.shared.listeners.lock().insert(kind, listener);
    }

    fn cancel(&self) {
        debug!(method = %self.shared.method, "stream cancelled by host");
        self.inner.cancel();
    }
}
