use ctor::ctor;
use std::any::Any;
use std::sync::{Arc, Once};

use callscope_runtime::{Inspector, OBSERVER_ENV};
use callscope_types::RpcClient;
use tracing::debug;

pub mod client;
pub mod transport;

pub use self::client::*;
pub use self::transport::*;

static OBSERVER_DISABLED_WARNING_ONCE: Once = Once::new();

#[ctor]
fn init_disabled_runtime() {
    emit_disabled_observer_warning_once();
}

fn emit_disabled_observer_warning_once() {
    let Some(value) = std::env::var_os(OBSERVER_ENV) else {
        return;
    };
    if value.to_string_lossy().trim().is_empty() {
        return;
    }

    OBSERVER_DISABLED_WARNING_ONCE.call_once(|| {
        eprintln!(
            "\n\x1b[1;31m\
======================================================================\n\
 CALLSCOPE WARNING: CALLSCOPE_OBSERVER is set, but call interception is disabled.\n\
 This process will NOT record or relay any RPC calls in this build.\n\
 Enable the `diagnostics` cargo feature of `callscope` to observe calls.\n\
======================================================================\x1b[0m\n"
        );
    });
}

/// Wraps each client in a pass-through [`InterceptedClient`].
pub fn install(inspector: &Inspector, clients: &[Arc<dyn RpcClient>]) -> Vec<InterceptedClient> {
    clients
        .iter()
        .map(|client| InterceptedClient::new(Arc::clone(client), inspector.clone()))
        .collect()
}

/// Untyped installer entry. Accepts a `Vec<Arc<dyn RpcClient>>`; anything
/// else is ignored and yields `None`.
pub fn install_any(clients: &dyn Any) -> Option<Vec<InterceptedClient>> {
    let Some(clients) = clients.downcast_ref::<Vec<Arc<dyn RpcClient>>>() else {
        debug!("installer called without a client list; ignored");
        return None;
    };
    Some(install(Inspector::global(), clients))
}
