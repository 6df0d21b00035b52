use callscope_types::{CallRecord, ClientCall, ExchangeId, Metadata, Response};
use parking_lot::Mutex;
use std::sync::{Arc, OnceLock};
use tracing::debug;

use crate::clock::{Clock, SystemClock};
use crate::correlate::correlate_response_headers;
use crate::emitter::{Emitter, PageBusSender, page_bus};
use crate::headers::{is_rpc_traffic, parse_header_block};
use crate::registry::{Exchange, ExchangeRegistry, TransportHeaders};
use crate::relay::spawn_relay;
use crate::{OBSERVER_ENV, PAGE_URL_ENV};

const DEFAULT_HOSTNAME: &str = "localhost";

/// Environment-derived settings for the process-wide inspector.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InspectorConfig {
    pub observer_addr: Option<String>,
    pub page_url: Option<String>,
}

impl InspectorConfig {
    pub fn from_env() -> Self {
        Self {
            observer_addr: non_blank_env(OBSERVER_ENV),
            page_url: non_blank_env(PAGE_URL_ENV),
        }
    }
}

fn non_blank_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn hostname_of(url: &str) -> Option<String> {
    url::Url::parse(url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(String::from))
}

struct InspectorInner {
    registry: Mutex<ExchangeRegistry>,
    clock: Arc<dyn Clock>,
    emitter: Emitter,
    page_url: String,
    default_hostname: String,
}

/// Shared engine state: the exchange registry, the fallback header cache,
/// and the emitter. Cheap to clone; clones share everything.
#[derive(Clone)]
pub struct Inspector {
    inner: Arc<InspectorInner>,
}

impl Inspector {
    pub fn builder() -> InspectorBuilder {
        InspectorBuilder::default()
    }

    /// The process-wide inspector, created from the environment on first use.
    pub fn global() -> &'static Inspector {
        static GLOBAL: OnceLock<Inspector> = OnceLock::new();
        GLOBAL.get_or_init(|| Self::from_config(InspectorConfig::from_env()))
    }

    pub fn from_config(config: InspectorConfig) -> Self {
        let mut builder = Self::builder();
        if let Some(page_url) = config.page_url {
            builder = builder.page_url(page_url);
        }
        if let Some(addr) = config.observer_addr {
            builder = builder.relay_to(addr);
        }
        builder.build()
    }

    pub fn now(&self) -> callscope_types::PTime {
        self.inner.clock.now()
    }

    /// Starts tracking an exchange if its url passes the RPC-traffic heuristic.
    pub fn register_exchange(
        &self,
        id: ExchangeId,
        method: &str,
        url: &str,
        transport: TransportHeaders,
    ) -> bool {
        if !is_rpc_traffic(url) {
            return false;
        }
        let exchange = Exchange {
            id,
            url: String::from(url),
            method: String::from(method),
            start_time: self.now(),
            transport,
            headers: None,
        };
        self.inner.registry.lock().insert(exchange);
        debug!(%id, url, "exchange registered");
        true
    }

    /// Parses the raw header block of a finished exchange, records it as the
    /// fallback, and stops tracking the exchange. Returns the parsed headers.
    pub fn complete_exchange(&self, id: ExchangeId, raw_headers: Option<&str>) -> Metadata {
        let headers = parse_header_block(raw_headers);
        let now = self.now();
        let removed = self
            .inner
            .registry
            .lock()
            .complete(&id, headers.clone(), now);
        if let Some(exchange) = removed {
            debug!(
                %id,
                elapsed_ms = now.millis_since(exchange.start_time),
                headers = headers.len(),
                "exchange completed"
            );
        }
        headers
    }

    /// Stops tracking an exchange that will never reach completion. The
    /// fallback header cache is left as it is.
    pub fn forget_exchange(&self, id: ExchangeId) {
        if self.inner.registry.lock().remove(&id).is_some() {
            debug!(%id, "exchange abandoned before completion");
        }
    }

    pub fn headers_for(&self, method: &str) -> Metadata {
        let now = self.now();
        self.inner.registry.lock().headers_for(method, now)
    }

    /// Merged response headers for a finished unary call.
    pub fn correlate(
        &self,
        method: &str,
        call: Option<&dyn ClientCall>,
        response: Option<&Response>,
    ) -> Metadata {
        correlate_response_headers(call, response, || self.headers_for(method))
    }

    /// The host page's hostname, overridden by the host of a tracked exchange.
    pub fn resolve_hostname(&self) -> String {
        self.inner
            .registry
            .lock()
            .first_hostname()
            .unwrap_or_else(|| self.inner.default_hostname.clone())
    }

    pub fn page_url(&self) -> &str {
        &self.inner.page_url
    }

    pub fn active_exchanges(&self) -> usize {
        self.inner.registry.lock().len()
    }

    pub fn emit(&self, record: &CallRecord) {
        self.inner.emitter.emit(record);
    }
}

#[derive(Default)]
pub struct InspectorBuilder {
    clock: Option<Arc<dyn Clock>>,
    bus: Option<PageBusSender>,
    relay_addr: Option<String>,
    page_url: Option<String>,
    hostname: Option<String>,
}

impl InspectorBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Posts records on `bus` instead of a bus owned by the inspector.
    pub fn page_bus(mut self, bus: PageBusSender) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Forwards records to the observer at `addr`, over a bus owned by the inspector.
    pub fn relay_to(mut self, addr: impl Into<String>) -> Self {
        self.relay_addr = Some(addr.into());
        self
    }

    pub fn page_url(mut self, url: impl Into<String>) -> Self {
        self.page_url = Some(url.into());
        self
    }

    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn build(self) -> Inspector {
        let bus = match (self.bus, self.relay_addr) {
            (Some(bus), _) => Some(bus),
            (None, Some(addr)) => {
                let (tx, rx) = page_bus();
                spawn_relay(addr, process_name(), rx);
                Some(tx)
            }
            (None, None) => None,
        };
        let page_url = self.page_url.unwrap_or_default();
        let default_hostname = self
            .hostname
            .or_else(|| hostname_of(&page_url))
            .unwrap_or_else(|| String::from(DEFAULT_HOSTNAME));

        Inspector {
            inner: Arc::new(InspectorInner {
                registry: Mutex::new(ExchangeRegistry::new()),
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                emitter: Emitter::new(bus),
                page_url,
                default_hostname,
            }),
        }
    }
}

fn process_name() -> String {
    std::env::current_exe()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|_| String::from("unknown"))
}
