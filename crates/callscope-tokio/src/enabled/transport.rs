use std::sync::Arc;

use callscope_runtime::{Inspector, TransportHeaders};
use callscope_types::{
    ExchangeId, HttpPrimitive, Metadata, ReadyState, ReadyStateChange, ReadyStateHandler,
};
use parking_lot::Mutex;
use tracing::trace;

type HandlerSlot = Arc<Mutex<Option<ReadyStateHandler>>>;

/// Instrumented version of a low-level HTTP primitive.
///
/// Tags each round trip with an [`ExchangeId`] at `open`, registers RPC
/// traffic with the inspector at `send`, and harvests the response header
/// block when the primitive reports [`ReadyState::Done`]. The host's own
/// completion handler keeps receiving every notification, after the tap.
/// An exchange abandoned before `Done`, by a second `open` or by dropping
/// the wrapper, stops being tracked.
pub struct TappedHttp<P: HttpPrimitive> {
    inner: P,
    inspector: Inspector,
    id: Option<ExchangeId>,
    method: String,
    url: String,
    headers: TransportHeaders,
    host_handler: HandlerSlot,
    pending: Arc<Mutex<Option<ExchangeId>>>,
}

impl<P: HttpPrimitive> TappedHttp<P> {
    /// Wraps `inner`. A handler already installed on it is kept and still called.
    pub fn new(mut inner: P, inspector: Inspector) -> Self {
        let host_handler: HandlerSlot = Arc::new(Mutex::new(inner.take_ready_state_handler()));
        let pending = Arc::new(Mutex::new(None));
        inner.set_ready_state_handler(Some(compose(
            inspector.clone(),
            Arc::clone(&pending),
            Arc::clone(&host_handler),
        )));
        Self {
            inner,
            inspector,
            id: None,
            method: String::new(),
            url: String::new(),
            headers: TransportHeaders::new(),
            host_handler,
            pending,
        }
    }

    pub fn id(&self) -> Option<ExchangeId> {
        self.id
    }

    /// Headers harvested at completion, if this exchange was tracked and finished.
    pub fn response_headers(&self) -> Option<Metadata> {
        self.headers.get()
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut P {
        &mut self.inner
    }

    fn abandon_pending(&self) {
        let orphan = self.pending.lock().take();
        if let Some(id) = orphan {
            self.inspector.forget_exchange(id);
        }
    }
}

impl<P: HttpPrimitive> Drop for TappedHttp<P> {
    fn drop(&mut self) {
        self.abandon_pending();
    }
}

fn compose(
    inspector: Inspector,
    pending: Arc<Mutex<Option<ExchangeId>>>,
    host_handler: HandlerSlot,
) -> ReadyStateHandler {
    Box::new(move |change: &ReadyStateChange<'_>| {
        if change.state == ReadyState::Done {
            let finished = pending.lock().take();
            if let Some(id) = finished {
                inspector.complete_exchange(id, change.raw_response_headers);
            }
        }

        // The host may swap its handler while one is running; keep the newer one.
        let taken = host_handler.lock().take();
        if let Some(mut handler) = taken {
            handler(change);
            host_handler.lock().get_or_insert(handler);
        }
    })
}

impl<P: HttpPrimitive> HttpPrimitive for TappedHttp<P> {
    fn open(&mut self, method: &str, url: &str) {
        self.abandon_pending();
        self.headers = TransportHeaders::new();
        self.id = Some(ExchangeId::next());
        self.method = String::from(method);
        self.url = String::from(url);
        self.inner.open(method, url);
    }

    fn send(&mut self, body: Option<Vec<u8>>) {
        if let Some(id) = self.id {
            let tracked =
                self.inspector
                    .register_exchange(id, &self.method, &self.url, self.headers.clone());
            if tracked {
                *self.pending.lock() = Some(id);
            } else {
                trace!(url = %self.url, "not rpc traffic; exchange untracked");
            }
        }
        self.inner.send(body);
    }

    fn take_ready_state_handler(&mut self) -> Option<ReadyStateHandler> {
        self.host_handler.lock().take()
    }

    fn set_ready_state_handler(&mut self, handler: Option<ReadyStateHandler>) {
        *self.host_handler.lock() = handler;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeHttp, headers};
    use callscope_runtime::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_handler(count: &Arc<AtomicUsize>) -> ReadyStateHandler {
        let count = Arc::clone(count);
        Box::new(move |_: &ReadyStateChange<'_>| {
            count.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn rpc_exchange_is_tracked_until_done() {
        let clock = Arc::new(ManualClock::new(0));
        let inspector = Inspector::builder().clock(clock.clone()).build();
        let mut http = TappedHttp::new(FakeHttp::new(), inspector.clone());

        http.open("POST", "https://api.shop.example/twirp/orders.Orders/Get");
        assert!(http.id().is_some());
        http.send(Some(b"{}".to_vec()));
        assert_eq!(inspector.active_exchanges(), 1);
        assert_eq!(inspector.resolve_hostname(), "api.shop.example");

        http.inner_mut().fire(ReadyState::HeadersReceived, None);
        assert_eq!(inspector.active_exchanges(), 1);

        clock.advance(20);
        http.inner_mut().fire(
            ReadyState::Done,
            Some("X-Trace-Id: abc123\r\ncontent-type: application/json\r\n"),
        );
        assert_eq!(inspector.active_exchanges(), 0);

        let expected = headers(&[("x-trace-id", "abc123"), ("content-type", "application/json")]);
        assert_eq!(http.response_headers(), Some(expected.clone()));
        assert_eq!(inspector.headers_for("Orders.Get"), expected);
        assert_eq!(http.inner().opened.as_ref().map(|(m, _)| m.as_str()), Some("POST"));
        assert_eq!(http.inner().sent, vec![Some(b"{}".to_vec())]);
    }

    #[test]
    fn other_traffic_passes_through_untracked() {
        let inspector = Inspector::builder().build();
        let mut http = TappedHttp::new(FakeHttp::new(), inspector.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        http.set_ready_state_handler(Some(counting_handler(&calls)));

        http.open("GET", "https://cdn.shop.example/app.js");
        http.send(None);
        assert_eq!(inspector.active_exchanges(), 0);

        http.inner_mut().fire(ReadyState::Done, Some("x-trace-id: nope\r\n"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(http.response_headers(), None);
        assert!(inspector.headers_for("Orders.Get").is_empty());
    }

    #[test]
    fn host_handler_installed_before_wrapping_still_fires() {
        let inspector = Inspector::builder().build();
        let calls = Arc::new(AtomicUsize::new(0));
        let mut raw = FakeHttp::new();
        raw.set_ready_state_handler(Some(counting_handler(&calls)));

        let mut http = TappedHttp::new(raw, inspector);
        assert!(http.inner().has_handler());
        http.open("POST", "https://api.shop.example/grpc/Orders/Get");
        http.send(None);
        http.inner_mut().fire(ReadyState::Loading, None);
        http.inner_mut().fire(ReadyState::Done, None);

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(http.response_headers(), Some(Metadata::new()));
    }

    #[test]
    fn completion_is_harvested_once() {
        let clock = Arc::new(ManualClock::new(0));
        let inspector = Inspector::builder().clock(clock.clone()).build();
        let mut http = TappedHttp::new(FakeHttp::new(), inspector.clone());

        http.open("POST", "https://api.shop.example/gw/orders");
        http.send(None);
        http.inner_mut().fire(ReadyState::Done, Some("x-trace-id: first\r\n"));
        clock.advance(1_500);
        http.inner_mut().fire(ReadyState::Done, Some("x-trace-id: second\r\n"));

        // The fallback still carries the first harvest and its capture time.
        assert_eq!(inspector.headers_for("Orders.Get")["x-trace-id"], "first");
        clock.advance(500);
        assert!(inspector.headers_for("Orders.Get").is_empty());
    }

    #[test]
    fn dropping_an_unfinished_exchange_stops_tracking_it() {
        let clock = Arc::new(ManualClock::new(0));
        let inspector = Inspector::builder().clock(clock.clone()).build();

        let mut done = TappedHttp::new(FakeHttp::new(), inspector.clone());
        done.open("POST", "https://api.shop.example/twirp/orders.Orders/Get");
        done.send(None);
        done.inner_mut().fire(ReadyState::Done, Some("x-trace-id: first\r\n"));
        drop(done);

        let mut stale = TappedHttp::new(FakeHttp::new(), inspector.clone());
        stale.open("POST", "https://stale.shop.example/grpc/orders.Orders/List");
        stale.send(None);
        assert_eq!(inspector.resolve_hostname(), "stale.shop.example");

        drop(stale);
        assert_eq!(inspector.active_exchanges(), 0);
        assert_eq!(inspector.resolve_hostname(), "localhost");
        assert_eq!(inspector.headers_for("Orders.Get")["x-trace-id"], "first");
    }

    #[test]
    fn reopening_replaces_the_unfinished_exchange() {
        let inspector = Inspector::builder().build();
        let mut http = TappedHttp::new(FakeHttp::new(), inspector.clone());

        http.open("POST", "https://stale.shop.example/twirp/orders.Orders/Get");
        http.send(None);
        let first = http.id();

        http.open("POST", "https://api.shop.example/twirp/orders.Orders/Get");
        http.send(None);
        assert_ne!(http.id(), first);
        assert_eq!(inspector.active_exchanges(), 1);
        assert_eq!(inspector.resolve_hostname(), "api.shop.example");

        http.inner_mut().fire(ReadyState::Done, Some("x-trace-id: second\r\n"));
        assert_eq!(inspector.active_exchanges(), 0);
        assert_eq!(http.response_headers(), Some(headers(&[("x-trace-id", "second")])));
    }
}
