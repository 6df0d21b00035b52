use callscope_runtime::Inspector;
use callscope_types::{ExchangeId, HttpPrimitive, Metadata, ReadyStateHandler};

/// Pass-through HTTP primitive for the disabled backend.
pub struct TappedHttp<P: HttpPrimitive> {
    inner: P,
}

impl<P: HttpPrimitive> TappedHttp<P> {
    pub fn new(inner: P, _inspector: Inspector) -> Self {
        Self { inner }
    }

    pub fn id(&self) -> Option<ExchangeId> {
        None
    }

    pub fn response_headers(&self) -> Option<Metadata> {
        None
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut P {
        &mut self.inner
    }
}

impl<P: HttpPrimitive> HttpPrimitive for TappedHttp<P> {
    fn open(&mut self, method: &str, url: &str) {
        self.inner.open(method, url);
    }

    fn send(&mut self, body: Option<Vec<u8>>) {
        self.inner.send(body);
    }

    fn take_ready_state_handler(&mut self) -> Option<ReadyStateHandler> {
        self.inner.take_ready_state_handler()
    }

    fn set_ready_state_handler(&mut self, handler: Option<ReadyStateHandler>) {
        self.inner.set_ready_state_handler(handler);
    }
}
