use facet::Facet;
use facet_value::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Response metadata: lower-cased header name to a single flattened value.
pub type Metadata = BTreeMap<String, String>;

/// Plain structured payload used for request and response objects.
///
/// Serializes as the value itself, never as JSON text wrapped in a string.
#[derive(Facet, Clone, Debug, PartialEq)]
#[facet(transparent)]
pub struct Json(pub(crate) Value);

const EOF_MARKER: &str = "EOF";

impl Json {
    pub fn new(value: impl Into<Value>) -> Self {
        Self(value.into())
    }

    /// Parses JSON source text into a structured payload.
    pub fn parse(text: &str) -> Result<Self, String> {
        facet_json::from_str::<Value>(text)
            .map(Self)
            .map_err(|e| format!("invalid json payload: {e}"))
    }

    /// Captures any facet-shaped value as a structured payload.
    pub fn encode<T>(value: &T) -> Result<Self, String>
    where
        T: for<'facet> Facet<'facet>,
    {
        let text = facet_json::to_string(value).map_err(|e| e.to_string())?;
        Self::parse(&text)
    }

    /// Terminal marker carried as the `response` of a cleanly finished stream:
    /// the plain string `"EOF"`.
    pub fn eof() -> Self {
        Self::new(String::from(EOF_MARKER))
    }

    pub fn is_eof(&self) -> bool {
        *self == Self::eof()
    }

    pub fn null() -> Self {
        Self(Value::NULL)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }

    /// Decodes the payload into a typed value.
    pub fn decode<T>(&self) -> Result<T, String>
    where
        T: for<'facet> Facet<'facet>,
    {
        let text = self.to_json_string()?;
        facet_json::from_str::<T>(&text).map_err(|e| e.to_string())
    }

    pub fn to_json_string(&self) -> Result<String, String> {
        facet_json::to_string(&self.0).map_err(|e| e.to_string())
    }
}

impl From<Value> for Json {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

impl fmt::Display for Json {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self.to_json_string().map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

/// First-use monotonic anchor for process-relative timestamps.
fn ptime_anchor() -> &'static Instant {
    static PTIME_ANCHOR: OnceLock<Instant> = OnceLock::new();
    PTIME_ANCHOR.get_or_init(Instant::now)
}

/// process start time + N milliseconds
#[derive(Facet, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[facet(transparent)]
pub struct PTime(u64);

impl PTime {
    pub const ZERO: Self = Self(0);

    pub fn now() -> Self {
        let elapsed_ms = ptime_anchor().elapsed().as_millis().min(u64::MAX as u128) as u64;
        Self(elapsed_ms)
    }

    pub fn from_millis(ms: u64) -> Self {
        Self(ms)
    }

    pub fn as_millis(&self) -> u64 {
        self.0
    }

    /// Milliseconds elapsed from `earlier` to `self`, saturating at zero.
    pub fn millis_since(&self, earlier: PTime) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

/// Process-local identifier for one low-level HTTP exchange.
///
/// The upper 16 bits carry a per-process prefix, the lower 48 bits a
/// counter, so ids sort in dispatch order within one process.
#[derive(Facet, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[facet(transparent)]
pub struct ExchangeId(u64);

impl ExchangeId {
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);

        let prefix = process_prefix_u16();
        let counter = COUNTER.fetch_add(1, Ordering::Relaxed) & 0x0000_FFFF_FFFF_FFFF;
        Self(((prefix as u64) << 48) | counter)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EXCHANGE#{:016x}", self.0)
    }
}

pub fn process_prefix_u16() -> u16 {
    static PROCESS_PREFIX: OnceLock<u16> = OnceLock::new();
    *PROCESS_PREFIX.get_or_init(|| {
        let pid = std::process::id() as u64;
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        ((seed ^ pid) & 0xFFFF) as u16
    })
}
