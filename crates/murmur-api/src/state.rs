//! Shared application state.

use murmur_network::NetworkHandle;

/// Shared application state for API handlers.
#[derive(Clone)]
pub struct AppState {
    /// Handle to the running network service.
    pub network: NetworkHandle,
    /// Node name.
    pub node_name: String,
}

impl AppState {
    /// Create a new app state.
    pub fn new(network: NetworkHandle, node_name: String) -> Self {
        Self {
            network,
            node_name,
        }
    }
}
