use callscope_types::{ClientCall, Metadata, Response};
use tracing::trace;

/// Accumulates response headers from sources drained in priority order.
///
/// A key set by an earlier source is never overwritten by a later one.
#[derive(Default)]
pub struct HeaderMerge {
    merged: Metadata,
}

impl HeaderMerge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&mut self, source: &'static str, headers: Option<Metadata>) {
        let Some(headers) = headers else {
            return;
        };
        if headers.is_empty() {
            return;
        }
        trace!(source, count = headers.len(), "response headers found");
        for (name, value) in headers {
            self.merged.entry(name).or_insert(value);
        }
    }

    pub fn finish(self) -> Metadata {
        self.merged
    }
}

/// Collects response headers for one finished unary call.
///
/// Sources, highest priority first: the call object's header accessor,
/// its metadata accessor, its raw header field, the response message's
/// header and metadata accessors, headers stashed on the response by the
/// transport wrap, and finally `transport_fallback` (the exchange registry).
pub fn correlate_response_headers(
    call: Option<&dyn ClientCall>,
    response: Option<&Response>,
    transport_fallback: impl FnOnce() -> Metadata,
) -> Metadata {
    let mut merge = HeaderMerge::new();
    if let Some(call) = call {
        merge.drain("call.response_headers", call.response_headers());
        merge.drain("call.metadata", call.metadata());
        merge.drain("call.raw_headers", call.raw_headers());
    }
    if let Some(response) = response {
        merge.drain("response.response_headers", response.message().response_headers());
        merge.drain("response.metadata", response.message().metadata());
        merge.drain("response.stashed", response.stashed_headers().cloned());
    }
    merge.drain("transport", Some(transport_fallback()));
    merge.finish()
}
