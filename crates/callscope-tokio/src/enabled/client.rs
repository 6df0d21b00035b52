use std::sync::{Arc, OnceLock};

use callscope_runtime::Inspector;
use callscope_types::{
    CallError, CallRecord, ClientCall, Metadata, RawTransport, Request, Response, RpcClient,
    ServerStream, TransportSlot, UnaryCallback,
};
use tokio::sync::oneshot;
use tracing::{debug, trace};

use super::stream::InterceptedStream;

/// gRPC `CANCELLED`, reported when a unary callback is dropped unfired.
const CANCELLED: i32 = 1;

/// Instrumented version of a generated RPC client stub.
///
/// Dispatch goes to the wrapped client unchanged; completion is observed on
/// the way back, correlated, and emitted as exactly one record per unary
/// call. Server-streaming calls are handed back as [`InterceptedStream`]s.
#[derive(Clone)]
pub struct InterceptedClient {
    inner: Arc<dyn RpcClient>,
    inspector: Inspector,
}

impl InterceptedClient {
    /// Wraps `inner`, and its raw transport the first time this client is seen.
    pub fn new(inner: Arc<dyn RpcClient>, inspector: Inspector) -> Self {
        if let Some(slot) = inner.transport_slot() {
            StashingTransport::install(slot);
        }
        Self { inner, inspector }
    }

    pub fn inner(&self) -> &Arc<dyn RpcClient> {
        &self.inner
    }

    /// Awaitable form of [`RpcClient::rpc_call`]. Resolves with the first
    /// outcome the wrapped client reports.
    pub async fn unary_call(
        &self,
        method: &str,
        request: Request,
        metadata: Metadata,
    ) -> Result<Response, CallError> {
        let (tx, rx) = oneshot::channel();
        let mut tx = Some(tx);
        self.rpc_call(
            method,
            request,
            metadata,
            Box::new(move |outcome: Result<Response, CallError>| {
                if let Some(tx) = tx.take() {
                    let _ = tx.send(outcome);
                }
            }),
        );
        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(CallError::new(CANCELLED, "call dropped before completion")),
        }
    }
}

impl RpcClient for InterceptedClient {
    fn rpc_call(
        &self,
        method: &str,
        request: Request,
        metadata: Metadata,
        mut callback: UnaryCallback,
    ) -> Arc<dyn ClientCall> {
        // Filled once dispatch returns; a callback fired synchronously from
        // inside dispatch sees no call object and correlates without it.
        let call_slot: Arc<OnceLock<Arc<dyn ClientCall>>> = Arc::new(OnceLock::new());
        let mut posted = false;
        let request_json = request.to_object();
        let inspector = self.inspector.clone();
        let owned_method = String::from(method);

        let observed: UnaryCallback = Box::new({
            let call_slot = Arc::clone(&call_slot);
            move |outcome: Result<Response, CallError>| {
                if !posted {
                    posted = true;
                    let call = call_slot.get().map(|call| call.as_ref());
                    let headers = inspector.correlate(&owned_method, call, outcome.as_ref().ok());
                    let record = CallRecord::unary(
                        owned_method.clone(),
                        request_json.clone(),
                        outcome
                            .as_ref()
                            .map(Response::to_object)
                            .map_err(Clone::clone),
                        headers,
                        inspector.page_url(),
                        inspector.resolve_hostname(),
                    );
                    debug!(
                        method = %owned_method,
                        ok = record.error.is_none(),
                        trace_id = record.trace_id().unwrap_or(""),
                        "unary call completed"
                    );
                    inspector.emit(&record);
                } else {
                    trace!(method = %owned_method, "repeated completion; not re-emitted");
                }
                callback(outcome);
            }
        });

        let call = self.inner.rpc_call(method, request, metadata, observed);
        let _ = call_slot.set(Arc::clone(&call));
        call
    }

    fn server_streaming(
        &self,
        method: &str,
        request: Request,
        metadata: Metadata,
    ) -> Arc<dyn ServerStream> {
        let stream = self.inner.server_streaming(method, request, metadata);
        Arc::new(InterceptedStream::new(method, stream, self.inspector.clone()))
    }

    fn transport_slot(&self) -> Option<&TransportSlot> {
        self.inner.transport_slot()
    }
}

/// Raw-transport wrap that copies header accessor results found on a
/// response onto the response itself, for later correlation.
pub struct StashingTransport {
    inner: Arc<dyn RawTransport>,
}

impl StashingTransport {
    pub fn new(inner: Arc<dyn RawTransport>) -> Self {
        Self { inner }
    }

    /// Wraps the slot's transport unless an earlier install already did.
    pub fn install(slot: &TransportSlot) {
        if slot.mark_instrumented() {
            slot.replace_with(|current| Arc::new(Self::new(current)));
        }
    }
}

impl RawTransport for StashingTransport {
    fn call(
        &self,
        method: &str,
        request: Request,
        metadata: Metadata,
        mut callback: UnaryCallback,
    ) -> Arc<dyn ClientCall> {
        self.inner.call(
            method,
            request,
            metadata,
            Box::new(move |outcome: Result<Response, CallError>| {
                if let Ok(response) = &outcome {
                    if let Some(headers) = response.message().response_headers() {
                        response.stash_headers(headers);
                    }
                }
                callback(outcome);
            }),
        )
    }
}
