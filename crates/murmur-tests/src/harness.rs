//! Test harness for integration tests.
//!
//! Provides utilities for starting in-process nodes on loopback ports,
//! keeping their data directories across restarts, and waiting for the
//! network to converge.

use murmur_network::{
    NetworkConfig, NetworkEvent, NetworkHandle, NetworkResult, NetworkService, PeerRecord,
};
use murmur_storage::{FileStorage, Storage};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Upper bound for any convergence wait.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Data directory that outlives node restarts and is removed on drop.
pub struct TestDataDir {
    temp_dir: TempDir,
}

impl TestDataDir {
    /// Create a new data directory.
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Get the path to the data directory.
    pub fn path(&self) -> PathBuf {
        self.temp_dir.path().to_path_buf()
    }

    /// Open file storage rooted at the data directory.
    pub fn storage(&self) -> Arc<dyn Storage> {
        Arc::new(FileStorage::open(self.temp_dir.path()).expect("Failed to open storage"))
    }

    /// Path of the persisted registry of `node`.
    pub fn registry_path(&self, node: &TestNode) -> PathBuf {
        registry_path(self.temp_dir.path(), node)
    }
}

impl Default for TestDataDir {
    fn default() -> Self {
        Self::new()
    }
}

fn registry_path(root: &Path, node: &TestNode) -> PathBuf {
    root.join(node.handle.identity().id.to_string())
        .join(murmur_network::REGISTRY_FILE)
}

/// Network configuration for a loopback node. Port 0 picks a free port.
pub fn node_config(port: u16, bootstrap: Option<&str>) -> NetworkConfig {
    NetworkConfig {
        listen_addr: SocketAddr::from(([127, 0, 0, 1], port)),
        bootstrap_peer: bootstrap.map(str::to_string),
        ..Default::default()
    }
}

/// A running in-process node.
pub struct TestNode {
    /// Handle to the node's network service.
    pub handle: NetworkHandle,
    /// Events emitted by the node.
    pub events: mpsc::Receiver<NetworkEvent>,
    /// Bound listen address.
    pub local_addr: SocketAddr,
    task: JoinHandle<NetworkResult<()>>,
}

impl TestNode {
    /// Bind and run a node.
    pub async fn start(storage: Arc<dyn Storage>, config: NetworkConfig) -> Self {
        let (service, handle, events) = NetworkService::bind(config, storage)
            .await
            .expect("Failed to bind network service");
        let local_addr = service.local_addr().expect("Listener has no address");
        let task = tokio::spawn(service.run());

        Self {
            handle,
            events,
            local_addr,
            task,
        }
    }

    /// Run a node on a free port of the given data directory.
    pub async fn spawn(data: &TestDataDir, bootstrap: Option<&str>) -> Self {
        Self::start(data.storage(), node_config(0, bootstrap)).await
    }

    /// Announced address of the node.
    pub fn address(&self) -> String {
        self.handle.identity().address.clone()
    }

    /// The node as a registry record.
    pub fn record(&self) -> PeerRecord {
        self.handle.identity().record()
    }

    /// Wait for the first event matching `predicate`.
    pub async fn wait_for_event(
        &mut self,
        mut predicate: impl FnMut(&NetworkEvent) -> bool,
    ) -> NetworkEvent {
        let events = &mut self.events;
        let result = tokio::time::timeout(WAIT_TIMEOUT, async {
            while let Some(event) = events.recv().await {
                if predicate(&event) {
                    return Some(event);
                }
            }
            None
        })
        .await;

        match result {
            Ok(Some(event)) => event,
            Ok(None) => panic!("Event stream of {} ended", self.local_addr),
            Err(_) => panic!("Timed out waiting for an event on {}", self.local_addr),
        }
    }

    /// Take every event emitted so far without waiting.
    pub fn drain_events(&mut self) -> Vec<NetworkEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Shut the node down and wait for its service to stop.
    pub async fn stop(self) -> NetworkResult<()> {
        let _ = self.handle.shutdown().await;
        self.task.await.expect("Network service panicked")
    }

    /// Wait for the service task to finish on its own.
    pub async fn join(self) -> NetworkResult<()> {
        self.task.await.expect("Network service panicked")
    }
}

/// Check whether `peers` contains the node listening on `address`.
pub fn contains_address(peers: &[PeerRecord], address: &str) -> bool {
    peers.iter().any(|peer| peer.address == address)
}

/// Poll the registry of `handle` until `predicate` holds.
pub async fn wait_for_registry(
    handle: &NetworkHandle,
    mut predicate: impl FnMut(&[PeerRecord]) -> bool,
) -> Vec<PeerRecord> {
    let result = tokio::time::timeout(WAIT_TIMEOUT, async {
        loop {
            if let Ok(peers) = handle.list_peers().await {
                if predicate(&peers) {
                    return peers;
                }
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    })
    .await;

    result.unwrap_or_else(|_| {
        panic!(
            "Registry of {} did not converge",
            handle.identity().address
        )
    })
}

/// Poll the online peers of `handle` until `predicate` holds.
pub async fn wait_for_online(
    handle: &NetworkHandle,
    mut predicate: impl FnMut(&[PeerRecord]) -> bool,
) -> Vec<PeerRecord> {
    let result = tokio::time::timeout(WAIT_TIMEOUT, async {
        loop {
            if let Ok(peers) = handle.list_online_peers().await {
                if predicate(&peers) {
                    return peers;
                }
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    })
    .await;

    result.unwrap_or_else(|_| {
        panic!(
            "Online peers of {} did not converge",
            handle.identity().address
        )
    })
}
