//! Host-side capabilities the engine decorates.
//!
//! These traits describe the two observation points: a low-level HTTP
//! primitive (one object per round trip, callback driven) and a generated
//! RPC client stub that dispatches unary and server-streaming calls on top
//! of it. The engine never needs their internals, only these entry points.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, RwLock};

use crate::{CallError, Json, Metadata};

// ---------------------------------------------------------------------------
// Low-level HTTP primitive
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    Unsent,
    Opened,
    HeadersReceived,
    Loading,
    Done,
}

/// Notification fired by the primitive whenever its ready state moves.
pub struct ReadyStateChange<'a> {
    pub state: ReadyState,
    /// CRLF-delimited `name: value` block, if the primitive exposes one.
    pub raw_response_headers: Option<&'a str>,
}

pub type ReadyStateHandler = Box<dyn FnMut(&ReadyStateChange<'_>) + Send>;

/// One low-level HTTP round trip, shaped after a browser request object.
pub trait HttpPrimitive: Send {
    fn open(&mut self, method: &str, url: &str);

    fn send(&mut self, body: Option<Vec<u8>>);

    /// Removes and returns the installed completion handler, if any.
    fn take_ready_state_handler(&mut self) -> Option<ReadyStateHandler>;

    fn set_ready_state_handler(&mut self, handler: Option<ReadyStateHandler>);
}

// ---------------------------------------------------------------------------
// RPC client stub
// ---------------------------------------------------------------------------

/// Request or response message of the generated stub.
pub trait RpcMessage: Send + Sync {
    /// Plain structured rendering of the message.
    fn to_object(&self) -> Json;

    fn response_headers(&self) -> Option<Metadata> {
        None
    }

    fn metadata(&self) -> Option<Metadata> {
        None
    }
}

pub type Request = Arc<dyn RpcMessage>;

/// A response message plus a side slot where instrumentation may stash
/// headers it found on the way through the transport.
///
/// Clones share the slot.
#[derive(Clone)]
pub struct Response {
    message: Arc<dyn RpcMessage>,
    stashed_headers: Arc<OnceLock<Metadata>>,
}

impl Response {
    pub fn new(message: Arc<dyn RpcMessage>) -> Self {
        Self {
            message,
            stashed_headers: Arc::new(OnceLock::new()),
        }
    }

    pub fn message(&self) -> &dyn RpcMessage {
        self.message.as_ref()
    }

    pub fn to_object(&self) -> Json {
        self.message.to_object()
    }

    /// Keeps the first stash; later stashes are ignored.
    pub fn stash_headers(&self, headers: Metadata) {
        let _ = self.stashed_headers.set(headers);
    }

    pub fn stashed_headers(&self) -> Option<&Metadata> {
        self.stashed_headers.get()
    }

    pub fn same_message(&self, other: &Response) -> bool {
        Arc::ptr_eq(&self.message, &other.message)
    }
}

/// Completion callback of a unary dispatch. Some clients fire it more than once.
pub type UnaryCallback = Box<dyn FnMut(Result<Response, CallError>) + Send>;

/// Handle to an in-flight unary call, as returned by the dispatch.
pub trait ClientCall: Send + Sync {
    fn response_headers(&self) -> Option<Metadata> {
        None
    }

    fn metadata(&self) -> Option<Metadata> {
        None
    }

    /// Internal header field, when the implementation keeps one.
    fn raw_headers(&self) -> Option<Metadata> {
        None
    }

    fn cancel(&self) {}
}

/// Call handle for dispatches that expose nothing.
pub struct OpaqueCall;

impl ClientCall for OpaqueCall {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RpcStatus {
    pub code: i32,
    pub details: String,
    pub metadata: Metadata,
}

impl RpcStatus {
    pub fn ok() -> Self {
        Self {
            code: 0,
            details: String::new(),
            metadata: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StreamEventKind {
    Data,
    Status,
    Error,
}

#[derive(Clone)]
pub enum StreamEvent {
    Data(Response),
    Status(RpcStatus),
    Error(CallError),
}

impl StreamEvent {
    pub fn kind(&self) -> StreamEventKind {
        match self {
            Self::Data(_) => StreamEventKind::Data,
            Self::Status(_) => StreamEventKind::Status,
            Self::Error(_) => StreamEventKind::Error,
        }
    }
}

pub type StreamListener = Box<dyn FnMut(&StreamEvent) + Send>;

/// Server-streaming call handle. One listener per event kind; attaching a
/// second listener for the same kind replaces the first.
pub trait ServerStream: Send + Sync {
    fn on(&self, kind: StreamEventKind, listener: StreamListener);

    fn cancel(&self);
}

/// The client's raw transport-call entry point, below the stub.
pub trait RawTransport: Send + Sync {
    fn call(
        &self,
        method: &str,
        request: Request,
        metadata: Metadata,
        callback: UnaryCallback,
    ) -> Arc<dyn ClientCall>;
}

/// Replaceable holder for a client's raw transport.
pub struct TransportSlot {
    inner: RwLock<Arc<dyn RawTransport>>,
    instrumented: AtomicBool,
}

impl TransportSlot {
    pub fn new(transport: Arc<dyn RawTransport>) -> Self {
        Self {
            inner: RwLock::new(transport),
            instrumented: AtomicBool::new(false),
        }
    }

    /// Returns true the first time it is called for this slot.
    pub fn mark_instrumented(&self) -> bool {
        !self.instrumented.swap(true, Ordering::AcqRel)
    }

    pub fn get(&self) -> Arc<dyn RawTransport> {
        match self.inner.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    /// Swaps the transport for `wrap(current)`.
    pub fn replace_with(&self, wrap: impl FnOnce(Arc<dyn RawTransport>) -> Arc<dyn RawTransport>) {
        let mut guard = match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let current = Arc::clone(&*guard);
        *guard = wrap(current);
    }
}

/// Generated RPC client stub.
pub trait RpcClient: Send + Sync {
    fn rpc_call(
        &self,
        method: &str,
        request: Request,
        metadata: Metadata,
        callback: UnaryCallback,
    ) -> Arc<dyn ClientCall>;

    fn server_streaming(
        &self,
        method: &str,
        request: Request,
        metadata: Metadata,
    ) -> Arc<dyn ServerStream>;

    fn transport_slot(&self) -> Option<&TransportSlot> {
        None
    }
}
