use callscope_types::{ExchangeId, Metadata, PTime};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::FRESHNESS_WINDOW_MS;

/// Header copy kept on the live transport object.
///
/// Both the tapped transport and its registry entry hold a clone, so the
/// registry can ask "has this transport seen its headers yet" without
/// owning the transport itself.
#[derive(Clone, Default)]
pub struct TransportHeaders {
    inner: Arc<Mutex<Option<Metadata>>>,
}

impl TransportHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, headers: Metadata) {
        *self.inner.lock() = Some(headers);
    }

    pub fn get(&self) -> Option<Metadata> {
        self.inner.lock().clone()
    }

    pub fn is_attached(&self) -> bool {
        self.inner.lock().is_some()
    }
}

/// One tracked low-level round trip.
#[derive(Clone)]
pub struct Exchange {
    pub id: ExchangeId,
    pub url: String,
    pub method: String,
    pub start_time: PTime,
    pub transport: TransportHeaders,
    pub headers: Option<Metadata>,
}

struct FallbackHeaders {
    headers: Metadata,
    captured_at: PTime,
}

/// In-flight exchanges plus the most recently observed header set.
pub struct ExchangeRegistry {
    active: BTreeMap<ExchangeId, Exchange>,
    fallback: Option<FallbackHeaders>,
}

impl Default for ExchangeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ExchangeRegistry {
    pub fn new() -> Self {
        Self {
            active: BTreeMap::new(),
            fallback: None,
        }
    }

    pub fn insert(&mut self, exchange: Exchange) {
        self.active.insert(exchange.id, exchange);
    }

    pub fn get(&self, id: &ExchangeId) -> Option<&Exchange> {
        self.active.get(id)
    }

    pub fn remove(&mut self, id: &ExchangeId) -> Option<Exchange> {
        self.active.remove(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Exchange> {
        self.active.values()
    }

    pub fn len(&self) -> usize {
        self.active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Finishes an exchange: the fallback cache is overwritten, the headers
    /// land on the entry and its transport, and the entry is dropped.
    ///
    /// Returns the removed entry, if it was still tracked.
    pub fn complete(&mut self, id: &ExchangeId, headers: Metadata, now: PTime) -> Option<Exchange> {
        self.fallback = Some(FallbackHeaders {
            headers: headers.clone(),
            captured_at: now,
        });
        let exchange = self.active.get_mut(id)?;
        exchange.transport.attach(headers.clone());
        exchange.headers = Some(headers);
        self.active.remove(id)
    }

    /// Best-effort header lookup for a finished RPC call.
    ///
    /// `_method` cannot disambiguate: nothing ties an RPC method name to a
    /// transport exchange. The first tracked transport that already holds
    /// headers wins; otherwise the fallback cache, if younger than the
    /// freshness window; otherwise nothing.
    pub fn headers_for(&self, _method: &str, now: PTime) -> Metadata {
        if let Some(headers) = self.active.values().find_map(|ex| ex.transport.get()) {
            return headers;
        }

        match &self.fallback {
            Some(fallback)
                if now.millis_since(fallback.captured_at) < FRESHNESS_WINDOW_MS
                    && !fallback.headers.is_empty() =>
            {
                fallback.headers.clone()
            }
            _ => Metadata::new(),
        }
    }

    /// Host of the first tracked exchange whose url parses as absolute.
    ///
    /// Iteration order carries no meaning; any tracked exchange may answer.
    pub fn first_hostname(&self) -> Option<String> {
        self.active.values().find_map(|ex| {
            url::Url::parse(&ex.url)
                .ok()
                .and_then(|parsed| parsed.host_str().map(String::from))
        })
    }
}
