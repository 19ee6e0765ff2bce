//! Persistent peer registry.
//!
//! Each node keeps one registry under `<node id>/peers.json`. Every access
//! goes through a single actor task that owns the storage handle and serves
//! requests one at a time from a queue, so a merge's reload, union and
//! persist steps never interleave with another mutation.

use crate::{NodeIdentity, PeerId, RegistryError, RegistryResult};
use murmur_storage::{create_json, read_json, write_json, Storage, StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Registry file name inside the node's storage namespace.
pub const REGISTRY_FILE: &str = "peers.json";

/// A peer known to this node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerRecord {
    /// Peer identifier, derived from `address`.
    pub id: PeerId,
    /// Normalized listen address.
    pub address: String,
}

impl PeerRecord {
    /// Create a record for the peer listening on `address`.
    pub fn new(address: &str) -> Self {
        let address = crate::normalize_address(address);
        Self {
            id: PeerId::from_address(&address),
            address,
        }
    }

    /// Check that `id` is the one derived from `address`.
    pub fn is_consistent(&self) -> bool {
        self.id == PeerId::from_address(&self.address)
    }
}

/// Storage key of the registry belonging to `node_id`.
pub fn registry_key(node_id: &PeerId) -> String {
    format!("{}/{}", node_id, REGISTRY_FILE)
}

/// Union `incoming` into `current`, keyed by id.
///
/// Existing records are never overwritten. Returns the records that were
/// actually added, in arrival order.
pub fn merge_records(current: &mut Vec<PeerRecord>, incoming: &[PeerRecord]) -> Vec<PeerRecord> {
    let mut added = Vec::new();
    for record in incoming {
        if !current.iter().any(|peer| peer.id == record.id) {
            current.push(record.clone());
            added.push(record.clone());
        }
    }
    added
}

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Upper bound for a single storage operation.
    pub storage_timeout: Duration,
    /// Attempts for a merge that hits a storage error.
    pub merge_attempts: u32,
    /// Delay before the first retry; grows linearly with the attempt count.
    pub retry_backoff: Duration,
    /// Capacity of the request queue.
    pub queue_size: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            storage_timeout: Duration::from_secs(5),
            merge_attempts: 3,
            retry_backoff: Duration::from_millis(100),
            queue_size: 64,
        }
    }
}

/// Requests served by the registry actor.
enum RegistryCommand {
    Load {
        response_tx: oneshot::Sender<RegistryResult<Vec<PeerRecord>>>,
    },
    Exists {
        response_tx: oneshot::Sender<RegistryResult<bool>>,
    },
    Create {
        records: Vec<PeerRecord>,
        response_tx: oneshot::Sender<RegistryResult<()>>,
    },
    Merge {
        records: Vec<PeerRecord>,
        response_tx: oneshot::Sender<RegistryResult<Vec<PeerRecord>>>,
    },
    MergeOrCreate {
        records: Vec<PeerRecord>,
        response_tx: oneshot::Sender<RegistryResult<Vec<PeerRecord>>>,
    },
}

/// Cloneable handle to a running registry actor.
#[derive(Clone)]
pub struct RegistryHandle {
    command_tx: mpsc::Sender<RegistryCommand>,
}

impl RegistryHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<RegistryResult<T>>) -> RegistryCommand,
    ) -> RegistryResult<T> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(make(response_tx))
            .await
            .map_err(|_| RegistryError::Closed)?;
        response_rx.await.map_err(|_| RegistryError::Closed)?
    }

    /// Read the persisted registry. `NotFound` if none exists yet.
    pub async fn load(&self) -> RegistryResult<Vec<PeerRecord>> {
        self.request(|response_tx| RegistryCommand::Load { response_tx })
            .await
    }

    /// Check whether a registry has been persisted.
    pub async fn exists(&self) -> RegistryResult<bool> {
        self.request(|response_tx| RegistryCommand::Exists { response_tx })
            .await
    }

    /// Allocate the registry seeded with `records` (self is always included).
    pub async fn create(&self, records: Vec<PeerRecord>) -> RegistryResult<()> {
        self.request(|response_tx| RegistryCommand::Create {
            records,
            response_tx,
        })
        .await
    }

    /// Union `records` into the existing registry. Returns the added records.
    pub async fn merge(&self, records: Vec<PeerRecord>) -> RegistryResult<Vec<PeerRecord>> {
        self.request(|response_tx| RegistryCommand::Merge {
            records,
            response_tx,
        })
        .await
    }

    /// Merge into the registry, creating it first if this is the very
    /// first bootstrap. Returns the added records.
    pub async fn merge_or_create(
        &self,
        records: Vec<PeerRecord>,
    ) -> RegistryResult<Vec<PeerRecord>> {
        self.request(|response_tx| RegistryCommand::MergeOrCreate {
            records,
            response_tx,
        })
        .await
    }
}

/// Single-writer owner of a node's persisted registry.
pub struct PeerRegistry {
    storage: Arc<dyn Storage>,
    key: String,
    self_record: PeerRecord,
    config: RegistryConfig,
    command_rx: mpsc::Receiver<RegistryCommand>,
    /// Storage operation that outlived its timeout.
    pending: Option<JoinHandle<()>>,
}

impl PeerRegistry {
    /// Start the registry actor for `identity` and return its handle.
    ///
    /// The actor stops once every handle has been dropped.
    pub fn spawn(
        storage: Arc<dyn Storage>,
        identity: &NodeIdentity,
        config: RegistryConfig,
    ) -> RegistryHandle {
        let (command_tx, command_rx) = mpsc::channel(config.queue_size);
        let registry = Self {
            storage,
            key: registry_key(&identity.id),
            self_record: identity.record(),
            config,
            command_rx,
            pending: None,
        };
        tokio::spawn(registry.run());
        RegistryHandle { command_tx }
    }

    async fn run(mut self) {
        debug!(key = %self.key, "Peer registry started");

        while let Some(command) = self.command_rx.recv().await {
            match command {
                RegistryCommand::Load { response_tx } => {
                    let _ = response_tx.send(self.load().await);
                }
                RegistryCommand::Exists { response_tx } => {
                    let _ = response_tx.send(self.read().await.map(|peers| peers.is_some()));
                }
                RegistryCommand::Create {
                    records,
                    response_tx,
                } => {
                    let _ = response_tx.send(self.create(records).await.map(|_| ()));
                }
                RegistryCommand::Merge {
                    records,
                    response_tx,
                } => {
                    let _ = response_tx.send(self.merge(&records).await);
                }
                RegistryCommand::MergeOrCreate {
                    records,
                    response_tx,
                } => {
                    let _ = response_tx.send(self.merge_or_create(&records).await);
                }
            }
        }

        debug!(key = %self.key, "Peer registry stopped");
    }

    /// Run a blocking storage operation bounded by the storage timeout.
    ///
    /// A timed-out operation keeps running on the blocking pool; no other
    /// operation starts until it has finished.
    async fn storage_op<T, F>(&mut self, op: F) -> RegistryResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn Storage) -> StorageResult<T> + Send + 'static,
    {
        self.settle().await?;

        let storage = Arc::clone(&self.storage);
        let mut task = tokio::task::spawn_blocking(move || op(storage.as_ref()));

        match tokio::time::timeout(self.config.storage_timeout, &mut task).await {
            Ok(Ok(result)) => result.map_err(RegistryError::from),
            Ok(Err(e)) => Err(RegistryError::Storage(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("storage task failed: {}", e),
            )))),
            Err(_) => {
                warn!(key = %self.key, timeout = ?self.config.storage_timeout, "Storage operation timed out");
                self.pending = Some(tokio::spawn(async move {
                    let _ = task.await;
                }));
                Err(RegistryError::Timeout(format!(
                    "storage operation on {} exceeded {:?}",
                    self.key, self.config.storage_timeout
                )))
            }
        }
    }

    /// Wait for a previously timed-out operation to finish.
    async fn settle(&mut self) -> RegistryResult<()> {
        let Some(pending) = self.pending.as_mut() else {
            return Ok(());
        };

        match tokio::time::timeout(self.config.storage_timeout, pending).await {
            Ok(_) => {
                debug!(key = %self.key, "Timed-out storage operation finished");
                self.pending = None;
                Ok(())
            }
            Err(_) => Err(RegistryError::Timeout(format!(
                "earlier storage operation on {} still running",
                self.key
            ))),
        }
    }

    async fn read(&mut self) -> RegistryResult<Option<Vec<PeerRecord>>> {
        let key = self.key.clone();
        self.storage_op(move |storage| read_json::<Vec<PeerRecord>>(storage, &key))
            .await
    }

    async fn load(&mut self) -> RegistryResult<Vec<PeerRecord>> {
        self.read().await?.ok_or(RegistryError::NotFound)
    }

    async fn create(&mut self, records: Vec<PeerRecord>) -> RegistryResult<Vec<PeerRecord>> {
        let mut peers = Vec::with_capacity(records.len() + 1);
        merge_records(&mut peers, &records);
        merge_records(&mut peers, std::slice::from_ref(&self.self_record));

        let key = self.key.clone();
        let to_write = peers.clone();
        self.storage_op(move |storage| create_json(storage, &key, &to_write))
            .await?;

        info!(key = %self.key, peers = peers.len(), "Peer registry created");
        Ok(peers)
    }

    async fn merge(&mut self, incoming: &[PeerRecord]) -> RegistryResult<Vec<PeerRecord>> {
        let mut attempt = 1;
        loop {
            match self.try_merge(incoming).await {
                Ok(added) => return Ok(added),
                Err(RegistryError::Storage(e)) if attempt < self.config.merge_attempts => {
                    warn!(
                        key = %self.key,
                        attempt,
                        error = %e,
                        "Registry merge failed, retrying"
                    );
                    tokio::time::sleep(self.config.retry_backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_merge(&mut self, incoming: &[PeerRecord]) -> RegistryResult<Vec<PeerRecord>> {
        let mut peers = self.load().await?;
        let added = merge_records(&mut peers, incoming);

        if added.is_empty() {
            return Ok(added);
        }

        let key = self.key.clone();
        self.storage_op(move |storage| write_json(storage, &key, &peers))
            .await?;

        debug!(key = %self.key, added = added.len(), "Peer registry updated");
        Ok(added)
    }

    async fn merge_or_create(&mut self, incoming: &[PeerRecord]) -> RegistryResult<Vec<PeerRecord>> {
        if self.read().await?.is_some() {
            return self.merge(incoming).await;
        }

        let mut created = self.create(incoming.to_vec()).await?;
        created.retain(|peer| peer.id != self.self_record.id);
        Ok(created)
    }
}
