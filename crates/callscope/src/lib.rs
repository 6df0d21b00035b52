//! RPC call interception and correlation for Tokio-based hosts.
//!
//! Callscope sits on both sides of a generated RPC client stub. Below it, a
//! [`TappedHttp`] wraps the low-level HTTP primitive and harvests response
//! headers per exchange. Above it, an [`InterceptedClient`] wraps the stub's
//! unary and server-streaming entry points. When a call completes the two
//! views are reconciled into one [`CallRecord`], which is posted on the page
//! bus and, when an observer is configured, relayed to it over TCP.
//!
//! # Using this crate
//!
//! ```toml
//! # Cargo.toml
//! callscope = { ..., features = ["diagnostics"] }
//! ```
//!
//! ```rust,ignore
//! let clients: Vec<Arc<dyn callscope::RpcClient>> = vec![orders_client, events_client];
//! let clients = callscope::install(callscope::Inspector::global(), &clients);
//! // Dispatch through `clients` exactly as through the originals.
//! ```
//!
//! Run `callscope-observer` and point your process at it:
//!
//! ```text
//! CALLSCOPE_OBSERVER=127.0.0.1:9229 CALLSCOPE_PAGE_URL=https://shop.example/ ./your-binary
//! ```
//!
//! # Cargo features
//!
//! | Feature | Effect |
//! |---------|--------|
//! | *(default, none)* | All wrappers are pass-throughs; nothing is recorded. |
//! | `diagnostics` | Enables exchange tracking, header correlation, and record emission. |
//!
//! Without `diagnostics`, setting `CALLSCOPE_OBSERVER` emits a warning and does not connect.

pub use callscope_runtime::{
    FRESHNESS_WINDOW_MS, Inspector, InspectorBuilder, InspectorConfig, ManualClock,
    PageBusReceiver, PageBusSender, PageMessage, page_bus,
};
pub use callscope_tokio::*;
pub use callscope_types::*;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Message(&'static str);

    impl RpcMessage for Message {
        fn to_object(&self) -> Json {
            Json::parse(self.0).expect("message text should be json")
        }
    }

    /// Client whose transport answers synchronously, as some in-process stubs do.
    struct EchoClient {
        calls: AtomicUsize,
    }

    impl RpcClient for EchoClient {
        fn rpc_call(
            &self,
            _method: &str,
            request: Request,
            _metadata: Metadata,
            mut callback: UnaryCallback,
        ) -> Arc<dyn ClientCall> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            callback(Ok(Response::new(request)));
            Arc::new(OpaqueCall)
        }

        fn server_streaming(
            &self,
            _method: &str,
            _request: Request,
            _metadata: Metadata,
        ) -> Arc<dyn ServerStream> {
            unimplemented!("unary only")
        }
    }

    #[tokio::test]
    async fn synchronous_completion_still_yields_one_record() {
        let (tx, mut rx) = page_bus();
        let inspector = Inspector::builder()
            .page_bus(tx)
            .hostname("shop.example")
            .build();
        let echo = Arc::new(EchoClient {
            calls: AtomicUsize::new(0),
        });
        let clients: Vec<Arc<dyn RpcClient>> = vec![echo.clone()];
        let wrapped = install(&inspector, &clients);

        let reply = wrapped[0]
            .unary_call("Echo.Say", Arc::new(Message(r#"{"text":"hi"}"#)), Metadata::new())
            .await
            .expect("echo should answer");
        assert_eq!(
            reply.to_object().to_json_string().expect("reply should encode"),
            r#"{"text":"hi"}"#
        );
        assert_eq!(echo.calls.load(Ordering::SeqCst), 1);

        let message = rx.try_recv().expect("one record");
        assert_eq!(
            message.data.to_json_string().expect("record should encode"),
            r#"{"method":"Echo.Say","methodType":"unary","request":{"text":"hi"},"response":{"text":"hi"},"responseHeaders":{},"url":"","hostname":"shop.example"}"#
        );
        let record: CallRecord = message.data.decode().expect("record");
        assert_eq!(record.method, "Echo.Say");
        assert!(rx.try_recv().is_err());
    }
}
