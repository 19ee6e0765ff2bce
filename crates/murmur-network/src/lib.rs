//! # murmur-network
//!
//! P2P networking layer for murmur nodes.
//!
//! This crate provides:
//! - Address-derived node identity
//! - Persistent peer registry behind a single-writer actor
//! - Liveness probing for reconnection after a restart
//! - TCP connection management
//! - The gossip protocol that registers, announces and reconnects peers
//! - Point-to-point user messages

mod codec;
mod connection;
mod error;
mod gossip;
mod identity;
mod message;
mod messaging;
mod peer;
mod probe;
mod registry;
mod service;

pub use codec::MessageCodec;
pub use connection::{dial, ConnectionConfig, ConnectionId, DialPurpose, Direction};
pub use error::{NetworkError, NetworkResult, RegistryError, RegistryResult};
pub use identity::{derive_id, normalize_address, NodeIdentity, PeerId};
pub use message::{Message, MessageType};
pub use messaging::{route, MessageLog, MessageLogEntry, Route, SendOutcome};
pub use peer::{ConnectionEntry, ConnectionManager, ConnectionState};
pub use probe::probe;
pub use registry::{
    merge_records, registry_key, PeerRecord, PeerRegistry, RegistryConfig, RegistryHandle,
    REGISTRY_FILE,
};
pub use service::{NetworkConfig, NetworkEvent, NetworkHandle, NetworkService};

/// Default P2P port.
pub const DEFAULT_P2P_PORT: u16 = 8080;

/// Maximum frame size.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024; // 1 MB
