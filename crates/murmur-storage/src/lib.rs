//! # murmur-storage
//!
//! Persistence layer for murmur nodes.
//!
//! Node state is addressed by slash-separated string keys such as
//! `"<node id>/peers.json"`. Two backends are provided:
//! - [`FileStorage`]: one file per key under a data directory, full-file
//!   overwrite on every write
//! - [`MemoryStorage`]: a process-local map, used by tests

mod error;
mod file;
mod memory;

pub use error::{StorageError, StorageResult};
pub use file::FileStorage;
pub use memory::MemoryStorage;

use serde::{de::DeserializeOwned, Serialize};

/// Storage trait for abstracting key-value persistence.
///
/// This allows for easy testing with mock implementations.
pub trait Storage: Send + Sync {
    /// Get the value stored under `key`, or `None` if nothing is stored.
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value.
    fn put(&self, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Allocate `key` and store `value` under it.
    ///
    /// Fails with [`StorageError::AlreadyExists`] if the key is taken.
    fn create(&self, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Check if a key exists.
    fn contains(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }
}

/// Read and decode a JSON value stored under `key`.
pub fn read_json<T: DeserializeOwned>(storage: &dyn Storage, key: &str) -> StorageResult<Option<T>> {
    match storage.get(key)? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StorageError::Corruption(format!("{}: {}", key, e))),
        None => Ok(None),
    }
}

/// Encode `value` as pretty-printed JSON and overwrite `key` with it.
pub fn write_json<T: Serialize + ?Sized>(
    storage: &dyn Storage,
    key: &str,
    value: &T,
) -> StorageResult<()> {
    storage.put(key, &encode_json(value)?)
}

/// Encode `value` as pretty-printed JSON and allocate `key` with it.
pub fn create_json<T: Serialize + ?Sized>(
    storage: &dyn Storage,
    key: &str,
    value: &T,
) -> StorageResult<()> {
    storage.create(key, &encode_json(value)?)
}

fn encode_json<T: Serialize + ?Sized>(value: &T) -> StorageResult<Vec<u8>> {
    serde_json::to_vec_pretty(value).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// Reject keys that would escape the storage root.
pub(crate) fn validate_key(key: &str) -> StorageResult<()> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|part| part.is_empty() || part == "." || part == "..");
    if bad {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}
