//! Tokio-side call interception: the transport tap, the client-call
//! interceptor, and the installer that wires them onto host clients.

// Without `diagnostics` every wrapper is a pass-through with the same API.
#[cfg(not(feature = "diagnostics"))]
mod disabled;
#[cfg(feature = "diagnostics")]
mod enabled;

#[cfg(not(feature = "diagnostics"))]
#[allow(unused_imports)]
pub use disabled::*;
#[cfg(feature = "diagnostics")]
pub use enabled::*;

#[cfg(test)]
pub(crate) mod fakes;
