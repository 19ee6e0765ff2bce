//! Node identity.
//!
//! A node is identified by a name-based UUID (v3, URL namespace) of its
//! normalized listen address. The same address always yields the same id,
//! which makes the id the network-wide deduplication key.

use crate::PeerRecord;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique peer identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(Uuid);

impl PeerId {
    /// Derive the id of the peer listening on `address`.
    pub fn from_address(address: &str) -> Self {
        let normalized = normalize_address(address);
        Self(Uuid::new_v3(&Uuid::NAMESPACE_URL, normalized.as_bytes()))
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

/// Derive a peer id from an address.
pub fn derive_id(address: &str) -> PeerId {
    PeerId::from_address(address)
}

/// Bring an address into canonical `host:port` form.
///
/// Strips any `scheme://` prefix and trailing slashes, and maps the host
/// `localhost` to `127.0.0.1`.
pub fn normalize_address(address: &str) -> String {
    let trimmed = address.trim();
    let without_scheme = match trimmed.find("://") {
        Some(pos) => &trimmed[pos + 3..],
        None => trimmed,
    };
    let endpoint = without_scheme.trim_end_matches('/');

    match endpoint.rsplit_once(':') {
        Some((host, port)) if host.eq_ignore_ascii_case("localhost") => {
            format!("127.0.0.1:{}", port)
        }
        None if endpoint.eq_ignore_ascii_case("localhost") => "127.0.0.1".to_string(),
        _ => endpoint.to_string(),
    }
}

/// Identity of the running node. Immutable for the process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    /// Derived node id.
    pub id: PeerId,
    /// Normalized listen address announced to peers.
    pub address: String,
}

impl NodeIdentity {
    /// Create the identity for a node listening on `address`.
    pub fn new(address: &str) -> Self {
        let address = normalize_address(address);
        Self {
            id: PeerId::from_address(&address),
            address,
        }
    }

    /// This node as a registry record.
    pub fn record(&self) -> PeerRecord {
        PeerRecord {
            id: self.id,
            address: self.address.clone(),
        }
    }

    /// Check whether `address` denotes this node.
    pub fn is_self(&self, address: &str) -> bool {
        normalize_address(address) == self.address
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_id_deterministic() {
        let a = derive_id("127.0.0.1:8080");
        let b = derive_id("127.0.0.1:8080");
        assert_eq!(a, b);
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn test_derive_id_distinct() {
        assert_ne!(derive_id("127.0.0.1:8080"), derive_id("127.0.0.1:8081"));
        assert_ne!(derive_id("127.0.0.1:8080"), derive_id("10.0.0.1:8080"));
    }

    #[test]
    fn test_localhost_normalized() {
        assert_eq!(derive_id("localhost:8080"), derive_id("127.0.0.1:8080"));
        assert_eq!(derive_id("ws://localhost:8080"), derive_id("127.0.0.1:8080"));
        assert_eq!(derive_id("LOCALHOST:8080/"), derive_id("127.0.0.1:8080"));
    }

    #[test]
    fn test_normalize_address() {
        assert_eq!(normalize_address("ws://localhost:8080"), "127.0.0.1:8080");
        assert_eq!(normalize_address(" tcp://10.0.0.2:9000/ "), "10.0.0.2:9000");
        assert_eq!(normalize_address("example.org:7000"), "example.org:7000");
        assert_eq!(normalize_address("localhost"), "127.0.0.1");
        // Only the host is rewritten
        assert_eq!(normalize_address("mylocalhost:1"), "mylocalhost:1");
    }

    #[test]
    fn test_node_identity() {
        let identity = NodeIdentity::new("localhost:8080");
        assert_eq!(identity.address, "127.0.0.1:8080");
        assert_eq!(identity.id, derive_id("127.0.0.1:8080"));
        assert!(identity.is_self("ws://localhost:8080"));
        assert!(!identity.is_self("127.0.0.1:8081"));

        let record = identity.record();
        assert_eq!(record.id, identity.id);
        assert_eq!(record.address, identity.address);
    }

    #[test]
    fn test_peer_id_serializes_as_string() {
        let id = derive_id("127.0.0.1:8080");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
    }
}
