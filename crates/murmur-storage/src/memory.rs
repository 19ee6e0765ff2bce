//! In-memory storage backend.

use crate::{validate_key, Storage, StorageError, StorageResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Process-local storage. Clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    entries: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    /// Number of upcoming writes that fail with an I/O error.
    failing_writes: Arc<AtomicUsize>,
}

impl MemoryStorage {
    /// Create empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` writes (`put`/`create`) fail with an I/O error.
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn check_write(&self) -> StorageResult<()> {
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected write failure",
            )));
        }
        Ok(())
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_key(key)?;
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        self.check_write()?;
        self.entries.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn create(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        validate_key(key)?;
        self.check_write()?;
        let mut entries = self.entries.write();
        if entries.contains_key(key) {
            return Err(StorageError::AlreadyExists(key.to_string()));
        }
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }
}
