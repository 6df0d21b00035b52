pub(crate) mod client;
pub(crate) mod stream;
pub(crate) mod transport;

pub use self::client::*;
pub use self::stream::*;
pub use self::transport::*;

use std::any::Any;
use std::sync::Arc;

use callscope_runtime::Inspector;
use callscope_types::RpcClient;
use tracing::{debug, info};

/// Wraps each client's unary and server-streaming entry points, and its raw
/// transport when it exposes one. Calls made through the returned clients
/// are recorded on `inspector`.
pub fn install(inspector: &Inspector, clients: &[Arc<dyn RpcClient>]) -> Vec<InterceptedClient> {
    info!(clients = clients.len(), "installing call interception");
    clients
        .iter()
        .map(|client| InterceptedClient::new(Arc::clone(client), inspector.clone()))
        .collect()
}

/// Untyped installer entry on the process-wide inspector. Accepts a
/// `Vec<Arc<dyn RpcClient>>`; anything else is ignored and yields `None`.
pub fn install_any(clients: &dyn Any) -> Option<Vec<InterceptedClient>> {
    let Some(clients) = clients.downcast_ref::<Vec<Arc<dyn RpcClient>>>() else {
        debug!("installer called without a client list; ignored");
        return None;
    };
    Some(install(Inspector::global(), clients))
}
