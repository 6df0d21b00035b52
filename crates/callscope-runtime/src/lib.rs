//! Shared engine behind the call interceptor: exchange tracking, header
//! correlation, and record emission.

/// How long the most recent transport headers may stand in for a call
/// whose own headers could not be found.
pub const FRESHNESS_WINDOW_MS: u64 = 2_000;

/// A request url containing any of these is treated as RPC traffic.
pub const RPC_PATH_MARKERS: &[&str] = &["twirp", "grpc", "/gw/"];

/// Observer address for the relay, e.g. `127.0.0.1:9229`. Unset means no relay.
pub const OBSERVER_ENV: &str = "CALLSCOPE_OBSERVER";

/// Url of the host page, used for the default hostname.
pub const PAGE_URL_ENV: &str = "CALLSCOPE_PAGE_URL";

pub mod clock;
pub mod correlate;
pub mod emitter;
pub mod headers;
pub mod inspector;
pub mod registry;
pub mod relay;

pub use self::clock::{Clock, ManualClock, SystemClock};
pub use self::correlate::{HeaderMerge, correlate_response_headers};
pub use self::emitter::{Emitter, PageBusReceiver, PageBusSender, PageMessage, page_bus};
pub use self::headers::{is_rpc_traffic, parse_header_block};
pub use self::inspector::{Inspector, InspectorBuilder, InspectorConfig};
pub use self::registry::{Exchange, ExchangeRegistry, TransportHeaders};
pub use self::relay::{run_relay, spawn_relay};
