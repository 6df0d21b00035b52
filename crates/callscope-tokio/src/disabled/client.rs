use std::sync::Arc;

use callscope_runtime::Inspector;
use callscope_types::{
    CallError, ClientCall, Metadata, RawTransport, Request, Response, RpcClient, ServerStream,
    StreamEventKind, StreamListener, TransportSlot, UnaryCallback,
};
use tokio::sync::oneshot;

const CANCELLED: i32 = 1;

/// Pass-through client for the disabled backend.
#[derive(Clone)]
pub struct InterceptedClient {
    inner: Arc<dyn RpcClient>,
}

impl InterceptedClient {
    pub fn new(inner: Arc<dyn RpcClient>, _inspector: Inspector) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &Arc<dyn RpcClient> {
        &self.inner
    }

    pub async fn unary_call(
        &self,
        method: &str,
        request: Request,
        metadata: Metadata,
    ) -> Result<Response, CallError> {
        let (tx, rx) = oneshot::channel();
        let mut tx = Some(tx);
        self.inner.rpc_call(
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
        callback: UnaryCallback,
    ) -> Arc<dyn ClientCall> {
        self.inner.rpc_call(method, request, metadata, callback)
    }

    fn server_streaming(
        &self,
        method: &str,
        request: Request,
        metadata: Metadata,
    ) -> Arc<dyn ServerStream> {
        self.inner.server_streaming(method, request, metadata)
    }

    fn transport_slot(&self) -> Option<&TransportSlot> {
        self.inner.transport_slot()
    }
}

/// Pass-through stream handle for the disabled backend.
pub struct InterceptedStream {
    inner: Arc<dyn ServerStream>,
}

impl InterceptedStream {
    pub fn new(_method: &str, inner: Arc<dyn ServerStream>, _inspector: Inspector) -> Self {
        Self { inner }
    }

    pub fn is_terminated(&self) -> bool {
        false
    }
}

impl ServerStream for InterceptedStream {
    fn on(&self, kind: StreamEventKind, listener: StreamListener) {
        self.inner.on(kind, listener);
    }

    fn cancel(&self) {
        self.inner.cancel();
    }
}

/// Pass-through raw transport for the disabled backend.
pub struct StashingTransport {
    inner: Arc<dyn RawTransport>,
}

impl StashingTransport {
    pub fn new(inner: Arc<dyn RawTransport>) -> Self {
        Self { inner }
    }

    pub fn install(_slot: &TransportSlot) {}
}

impl RawTransport for StashingTransport {
    fn call(
        &self,
        method: &str,
        request: Request,
        metadata: Metadata,
        callback: UnaryCallback,
    ) -> Arc<dyn ClientCall> {
        self.inner.call(method, request, metadata, callback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeClient, Msg, response};
    use callscope_runtime::page_bus;
    use callscope_types::{RpcStatus, StreamEvent};
    use parking_lot::Mutex;

    #[test]
    fn calls_pass_through_without_records() {
        let (tx, mut rx) = page_bus();
        let inspector = Inspector::builder().page_bus(tx).build();
        let fake = FakeClient::new();
        let client = InterceptedClient::new(fake.clone(), inspector);

        let seen = Arc::new(Mutex::new(0));
        client.rpc_call(
            "Orders.Get",
            Msg::new("{}"),
            Metadata::new(),
            Box::new({
                let seen = Arc::clone(&seen);
                move |_: Result<Response, CallError>| *seen.lock() += 1
            }),
        );
        fake.transport.fire(Ok(response("{}")));
        fake.transport.fire(Ok(response("{}")));
        assert_eq!(*seen.lock(), 2);

        client.server_streaming("Events.Watch", Msg::new("{}"), Metadata::new());
        fake.last_stream().fire(StreamEvent::Status(RpcStatus::ok()));

        assert!(rx.try_recv().is_err());
        assert!(fake.transport_slot().is_some_and(|slot| slot.mark_instrumented()));
    }
}
