//! Network error types.

use murmur_storage::StorageError;
use thiserror::Error;

/// Network errors.
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Outbound connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Attempt to open or register a connection to this node itself.
    #[error("Refusing to connect to self: {0}")]
    SelfConnection(String),

    /// Invalid message.
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Message too large.
    #[error("Message too large: {size} bytes, max {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    /// Timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Peer registry failure.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// The network service is no longer running.
    #[error("Network service stopped")]
    ServiceStopped,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for network operations.
pub type NetworkResult<T> = Result<T, NetworkError>;

/// Peer registry errors.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// No registry has been persisted for this node yet.
    #[error("Peer registry not found")]
    NotFound,

    /// Underlying storage failed.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A storage operation did not complete in time.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The registry actor has stopped.
    #[error("Peer registry stopped")]
    Closed,
}

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;
