//! Node implementation.

use crate::config::NodeConfig;
use anyhow::{Context, Result};
use murmur_api::AppState;
use murmur_network::{NetworkEvent, NetworkHandle, NetworkService};
use murmur_storage::{FileStorage, Storage};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

/// The main node struct coordinating all components.
pub struct Node {
    /// Node configuration.
    config: NodeConfig,
    /// Registry storage.
    storage: Arc<FileStorage>,
    /// Network handle, set once the P2P listener is bound.
    network: RwLock<Option<NetworkHandle>>,
    /// API server handle.
    api_handle: RwLock<Option<tokio::task::JoinHandle<()>>>,
}

impl Node {
    /// Create a new node.
    pub fn new(config: NodeConfig) -> Result<Arc<Self>> {
        let storage = FileStorage::open(&config.data_dir).with_context(|| {
            format!("Failed to open data directory {:?}", config.data_dir)
        })?;

        Ok(Arc::new(Self {
            config,
            storage: Arc::new(storage),
            network: RwLock::new(None),
            api_handle: RwLock::new(None),
        }))
    }

    /// Run the node until the network service stops.
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        info!("Starting node services...");

        let network_config = self.config.network_config()?;
        let storage: Arc<dyn Storage> = self.storage.clone();
        let (service, handle, events) = NetworkService::bind(network_config, storage)
            .await
            .with_context(|| {
                format!(
                    "Failed to listen for P2P connections on {}",
                    self.config.network.bind_address
                )
            })?;

        info!(
            node = %handle.identity().id,
            address = %handle.identity().address,
            "Node identity"
        );
        *self.network.write().await = Some(handle.clone());

        tokio::spawn(log_events(events));

        // Start API server
        self.start_api(handle).await?;

        // Drive the P2P service on this task
        service.run().await.context("Network service failed")?;

        info!("Node main loop stopped");
        Ok(())
    }

    /// Start the API server.
    async fn start_api(&self, network: NetworkHandle) -> Result<()> {
        let bind_addr = self.config.api_addr()?;
        let app_state = AppState::new(network, self.config.node_name.clone());
        let router = murmur_api::build_api(app_state);

        info!("Starting API server on {}", bind_addr);

        let listener = tokio::net::TcpListener::bind(bind_addr).await?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                warn!("API server error: {}", e);
            }
        });

        *self.api_handle.write().await = Some(handle);

        Ok(())
    }

    /// Shutdown the node.
    pub async fn shutdown(&self) {
        info!("Shutting down node...");

        if let Some(network) = self.network.read().await.as_ref() {
            if let Err(e) = network.shutdown().await {
                debug!("Network service already stopped: {}", e);
            }
        }

        // Cancel API server
        if let Some(handle) = self.api_handle.write().await.take() {
            handle.abort();
        }

        info!("Node shutdown complete");
    }
}

/// Log network events that the service does not report itself.
async fn log_events(mut events: mpsc::Receiver<NetworkEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            NetworkEvent::PeerConnected {
                peer_id,
                address,
                outbound,
            } => debug!(peer = %peer_id, address = %address, outbound, "Connected"),
            NetworkEvent::PeerDisconnected { peer_id } => {
                debug!(peer = %peer_id, "Disconnected")
            }
            NetworkEvent::PeerRegistered { peer } => {
                info!(peer = %peer.id, address = %peer.address, "New peer has been registered")
            }
            NetworkEvent::PeerReconnected { peer } => {
                info!(peer = %peer.id, address = %peer.address, "Connection broadcasted")
            }
            NetworkEvent::PeerAnnounced { peer, reconnected } => {
                debug!(peer = %peer.id, reconnected, "Peer announced")
            }
            NetworkEvent::PeerAdmitted { peer_id } => debug!(peer = ?peer_id, "Admitted"),
            NetworkEvent::RegistrySynced { added } => debug!(added, "Registry synced"),
            NetworkEvent::MessageReceived { sender, body } => {
                info!(sender = %sender, "Message: \"{}\"", body)
            }
            NetworkEvent::DialFailed { address, error } => {
                warn!(address = %address, error = %error, "Could not reach peer")
            }
        }
    }
}
