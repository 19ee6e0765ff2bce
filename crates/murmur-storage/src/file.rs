//! File-backed storage: one file per key under a root directory.

use crate::{validate_key, Storage, StorageError, StorageResult};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Storage rooted at a data directory.
///
/// Key `"a/b.json"` maps to `<root>/a/b.json`. Values are written to a
/// sibling staging file first and only then moved or linked into place, so
/// a key never holds a half-written value.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Open storage at the given directory, creating it if missing.
    pub fn open<P: AsRef<Path>>(root: P) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        info!("Opened storage at {:?}", root);
        Ok(Self { root })
    }

    /// Root directory of this storage.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }

    fn ensure_parent(path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    fn sibling(path: &Path, suffix: &str) -> PathBuf {
        let mut name = path.to_path_buf().into_os_string();
        name.push(suffix);
        PathBuf::from(name)
    }

    /// Write and sync `value` to a staging file. Nothing is left behind on
    /// failure.
    fn stage(path: &Path, value: &[u8]) -> StorageResult<()> {
        let written = fs::File::create(path).and_then(|mut file| {
            file.write_all(value)?;
            file.sync_all()
        });
        if let Err(e) = written {
            let _ = fs::remove_file(path);
            return Err(e.into());
        }
        Ok(())
    }
}

impl Storage for FileStorage {
    fn get(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn put(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        let path = self.path_for(key)?;
        Self::ensure_parent(&path)?;

        let tmp = Self::sibling(&path, ".tmp");
        Self::stage(&tmp, value)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }

        debug!(key, bytes = value.len(), "Wrote key");
        Ok(())
    }

    fn create(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        let path = self.path_for(key)?;
        Self::ensure_parent(&path)?;
        if path.exists() {
            return Err(StorageError::AlreadyExists(key.to_string()));
        }

        // Stage the full value, then publish it with a link that fails if
        // the key was taken in the meantime
        let staged = Self::sibling(&path, ".new");
        Self::stage(&staged, value)?;
        let linked = fs::hard_link(&staged, &path);
        let _ = fs::remove_file(&staged);

        match linked {
            Ok(()) => {
                debug!(key, bytes = value.len(), "Created key");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(StorageError::AlreadyExists(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
