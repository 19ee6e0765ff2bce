//! Error types for the storage layer.

use thiserror::Error;

/// Storage-specific errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Key is already allocated.
    #[error("Key already exists: {0}")]
    AlreadyExists(String),

    /// Key is malformed or escapes the storage root.
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Stored bytes could not be decoded.
    #[error("Data corruption detected: {0}")]
    Corruption(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
