//! P2P protocol messages.
//!
//! Every frame is a JSON object with a mandatory `type` tag:
//!
//! ```text
//! {"type":"TARGET_CONNECTION","remote_id":"6f1c…","remote_address":"127.0.0.1:8080"}
//! {"type":"PEERS_DATABASE","peers":[{"id":"6f1c…","address":"127.0.0.1:8080"}]}
//! {"type":"MESSAGE","sender":"127.0.0.1:8080","message":"hello"}
//! ```

use crate::{NetworkError, NetworkResult, NodeIdentity, PeerId, PeerRecord};
use serde::{Deserialize, Serialize};

/// Message type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Initiator announcement on a bootstrap or reconnect dial.
    TargetConnection,
    /// Address announcement on an accepted connection.
    Connection,
    /// Full registry pushed by a handshake responder.
    PeersDatabase,
    /// Broadcast of a newly registered peer.
    NewPeer,
    /// Broadcast of a re-registered peer.
    ReconnectedPeer,
    /// Acknowledgement after dialing an announced peer.
    Admittance,
    /// User message.
    Message,
}

impl MessageType {
    /// Wire tag of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::TargetConnection => "TARGET_CONNECTION",
            MessageType::Connection => "CONNECTION",
            MessageType::PeersDatabase => "PEERS_DATABASE",
            MessageType::NewPeer => "NEW_PEER",
            MessageType::ReconnectedPeer => "RECONNECTED_PEER",
            MessageType::Admittance => "ADMITTANCE",
            MessageType::Message => "MESSAGE",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Message {
    /// Sent by the initiator of a bootstrap or reconnect dial.
    TargetConnection {
        remote_id: PeerId,
        remote_address: String,
    },
    /// Sent on an accepted connection to announce the sender's address.
    Connection {
        remote_id: PeerId,
        remote_address: String,
    },
    /// Registry snapshot of the responder.
    PeersDatabase { peers: Vec<PeerRecord> },
    /// A peer joined the network for the first time.
    NewPeer { peer: PeerRecord },
    /// A known peer rejoined the network.
    ReconnectedPeer { peer: PeerRecord },
    /// Sent after successfully dialing an announced peer. The sender may
    /// identify itself so the receiver can route messages back.
    Admittance {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        remote_id: Option<PeerId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        remote_address: Option<String>,
    },
    /// Point-to-point user message.
    #[serde(rename = "MESSAGE")]
    Text { sender: String, message: String },
}

impl Message {
    /// `TARGET_CONNECTION` announcing `identity`.
    pub fn target_connection(identity: &NodeIdentity) -> Self {
        Message::TargetConnection {
            remote_id: identity.id,
            remote_address: identity.address.clone(),
        }
    }

    /// `CONNECTION` announcing `identity`.
    pub fn connection(identity: &NodeIdentity) -> Self {
        Message::Connection {
            remote_id: identity.id,
            remote_address: identity.address.clone(),
        }
    }

    /// `ADMITTANCE` from `identity`.
    pub fn admittance(identity: &NodeIdentity) -> Self {
        Message::Admittance {
            remote_id: Some(identity.id),
            remote_address: Some(identity.address.clone()),
        }
    }

    /// Get the message type.
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::TargetConnection { .. } => MessageType::TargetConnection,
            Message::Connection { .. } => MessageType::Connection,
            Message::PeersDatabase { .. } => MessageType::PeersDatabase,
            Message::NewPeer { .. } => MessageType::NewPeer,
            Message::ReconnectedPeer { .. } => MessageType::ReconnectedPeer,
            Message::Admittance { .. } => MessageType::Admittance,
            Message::Text { .. } => MessageType::Message,
        }
    }

    /// Encode to JSON bytes (without frame delimiter).
    pub fn encode(&self) -> NetworkResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| NetworkError::Serialization(e.to_string()))
    }

    /// Decode from JSON bytes.
    pub fn decode(data: &[u8]) -> NetworkResult<Self> {
        serde_json::from_slice(data).map_err(|e| NetworkError::InvalidMessage(e.to_string()))
    }
}
