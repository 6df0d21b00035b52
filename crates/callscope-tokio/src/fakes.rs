//! In-memory host capabilities for driving the wrappers in tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use callscope_types::{
    CallError, ClientCall, HttpPrimitive, Json, Metadata, RawTransport, ReadyState,
    ReadyStateChange, ReadyStateHandler, Request, Response, RpcClient, RpcMessage, ServerStream,
    StreamEvent, StreamEventKind, StreamListener, TransportSlot, UnaryCallback,
};
use parking_lot::Mutex;

pub fn headers(pairs: &[(&str, &str)]) -> Metadata {
    pairs
        .iter()
        .map(|(k, v)| (String::from(*k), String::from(*v)))
        .collect()
}

#[derive(Default)]
pub struct FakeHttp {
    pub opened: Option<(String, String)>,
    pub sent: Vec<Option<Vec<u8>>>,
    handler: Option<ReadyStateHandler>,
}

impl FakeHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_handler(&self) -> bool {
        self.handler.is_some()
    }

    pub fn fire(&mut self, state: ReadyState, raw_response_headers: Option<&str>) {
        if let Some(handler) = self.handler.as_mut() {
            handler(&ReadyStateChange {
                state,
                raw_response_headers,
            });
        }
    }
}

impl HttpPrimitive for FakeHttp {
    fn open(&mut self, method: &str, url: &str) {
        self.opened = Some((String::from(method), String::from(url)));
    }

    fn send(&mut self, body: Option<Vec<u8>>) {
        self.sent.push(body);
    }

    fn take_ready_state_handler(&mut self) -> Option<ReadyStateHandler> {
        self.handler.take()
    }

    fn set_ready_state_handler(&mut self, handler: Option<ReadyStateHandler>) {
        self.handler = handler;
    }
}

/// Structured payload from JSON source text.
pub fn payload(text: &str) -> Json {
    Json::parse(text).expect("fake payload should be valid json")
}

pub struct Msg {
    pub json: &'static str,
    pub headers: Option<Metadata>,
}

impl Msg {
    pub fn new(json: &'static str) -> Arc<Self> {
        Arc::new(Self {
            json,
            headers: None,
        })
    }

    pub fn with_headers(json: &'static str, headers: Metadata) -> Arc<Self> {
        Arc::new(Self {
            json,
            headers: Some(headers),
        })
    }
}

impl RpcMessage for Msg {
    fn to_object(&self) -> Json {
        payload(self.json)
    }

    fn response_headers(&self) -> Option<Metadata> {
        self.headers.clone()
    }
}

pub fn response(json: &'static str) -> Response {
    Response::new(Msg::new(json))
}

#[derive(Default)]
pub struct FakeCall {
    pub headers: Mutex<Option<Metadata>>,
    pub cancelled: AtomicBool,
}

impl ClientCall for FakeCall {
    fn response_headers(&self) -> Option<Metadata> {
        self.headers.lock().clone()
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// Raw transport that parks callbacks until the test fires them.
#[derive(Default)]
pub struct FakeTransport {
    pending: Mutex<Vec<UnaryCallback>>,
    pub call: Arc<FakeCall>,
    pub calls: AtomicUsize,
}

impl FakeTransport {
    /// Invokes every parked callback with `outcome`, keeping them parked.
    pub fn fire(&self, outcome: Result<Response, CallError>) {
        let mut pending = std::mem::take(&mut *self.pending.lock());
        for callback in pending.iter_mut() {
            callback(outcome.clone());
        }
        let mut slot = self.pending.lock();
        pending.append(&mut slot);
        *slot = pending;
    }

    /// Invokes only the callback parked by the `index`-th dispatch, keeping it parked.
    pub fn fire_nth(&self, index: usize, outcome: Result<Response, CallError>) {
        let idle: UnaryCallback = Box::new(|_: Result<Response, CallError>| {});
        let mut callback = std::mem::replace(&mut self.pending.lock()[index], idle);
        callback(outcome);
        self.pending.lock()[index] = callback;
    }

    /// Drops every parked callback without firing it.
    pub fn abandon(&self) {
        self.pending.lock().clear();
    }
}

impl RawTransport for FakeTransport {
    fn call(
        &self,
        _method: &str,
        _request: Request,
        _metadata: Metadata,
        callback: UnaryCallback,
    ) -> Arc<dyn ClientCall> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.pending.lock().push(callback);
        self.call.clone()
    }
}

#[derive(Default)]
pub struct FakeStream {
    listeners: Mutex<BTreeMap<StreamEventKind, StreamListener>>,
    pub cancelled: AtomicBool,
}

impl FakeStream {
    pub fn fire(&self, event: StreamEvent) {
        let kind = event.kind();
        let taken = self.listeners.lock().remove(&kind);
        if let Some(mut listener) = taken {
            listener(&event);
            self.listeners.lock().entry(kind).or_insert(listener);
        }
    }
}

impl ServerStream for FakeStream {
    fn on(&self, kind: StreamEventKind, listener: StreamListener) {
        self.listeners.lock().insert(kind, listener);
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// Stub client that dispatches unary calls through its transport slot.
pub struct FakeClient {
    slot: TransportSlot,
    pub transport: Arc<FakeTransport>,
    pub streams: Mutex<Vec<Arc<FakeStream>>>,
}

impl FakeClient {
    pub fn new() -> Arc<Self> {
        let transport = Arc::new(FakeTransport::default());
        Arc::new(Self {
            slot: TransportSlot::new(transport.clone()),
            transport,
            streams: Mutex::new(Vec::new()),
        })
    }

    pub fn last_stream(&self) -> Arc<FakeStream> {
        self.streams
            .lock()
            .last()
            .cloned()
            .expect("a stream was opened")
    }
}

impl RpcClient for FakeClient {
    fn rpc_call(
        &self,
        method: &str,
        request: Request,
        metadata: Metadata,
        callback: UnaryCallback,
    ) -> Arc<dyn ClientCall> {
        self.slot.get().call(method, request, metadata, callback)
    }

    fn server_streaming(
        &self,
        _method: &str,
        _request: Request,
        _metadata: Metadata,
    ) -> Arc<dyn ServerStream> {
        let stream = Arc::new(FakeStream::default());
        self.streams.lock().push(stream.clone());
        stream
    }

    fn transport_slot(&self) -> Option<&TransportSlot> {
        Some(&self.slot)
    }
}
