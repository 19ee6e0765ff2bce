//! Point-to-point user messages.

use crate::{derive_id, NodeIdentity, PeerId, PeerRecord};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Result of a send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SendOutcome {
    /// Message queued on an open connection.
    Success,
    /// Recipient is registered but not connected.
    NotOnline,
    /// Recipient is not in the registry.
    NonExistent,
    /// Recipient is this node.
    SelfSend,
}

impl SendOutcome {
    /// Wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            SendOutcome::Success => "SUCCESS",
            SendOutcome::NotOnline => "NOT_ONLINE",
            SendOutcome::NonExistent => "NON_EXISTENT",
            SendOutcome::SelfSend => "SELF_SEND",
        }
    }
}

impl std::fmt::Display for SendOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One logged message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageLogEntry {
    /// Recipient address for sent messages, sender address for received ones.
    pub counterpart: String,
    /// Message body.
    pub body: String,
}

/// Session logs of sent and received messages, newest first.
#[derive(Debug, Default)]
pub struct MessageLog {
    sent: VecDeque<MessageLogEntry>,
    received: VecDeque<MessageLogEntry>,
}

impl MessageLog {
    /// Create empty logs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a delivered message.
    pub fn record_sent(&mut self, recipient: &str, body: &str) {
        self.sent.push_front(MessageLogEntry {
            counterpart: recipient.to_string(),
            body: body.to_string(),
        });
    }

    /// Record an incoming message.
    pub fn record_received(&mut self, sender: &str, body: &str) {
        self.received.push_front(MessageLogEntry {
            counterpart: sender.to_string(),
            body: body.to_string(),
        });
    }

    /// Sent messages, newest first.
    pub fn sent(&self) -> Vec<MessageLogEntry> {
        self.sent.iter().cloned().collect()
    }

    /// Received messages, newest first.
    pub fn received(&self) -> Vec<MessageLogEntry> {
        self.received.iter().cloned().collect()
    }
}

/// Routing decision for an outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Transmit over the open connection to `peer_id`.
    Deliver { peer_id: PeerId, address: String },
    /// Do not transmit.
    Refuse(SendOutcome),
}

/// Decide how to deliver a message to `recipient`.
///
/// Checks run in order: self, registry membership, connectivity.
pub fn route(
    identity: &NodeIdentity,
    recipient: &str,
    registry: &[PeerRecord],
    is_online: impl Fn(&PeerId) -> bool,
) -> Route {
    if identity.is_self(recipient) {
        return Route::Refuse(SendOutcome::SelfSend);
    }

    let peer_id = derive_id(recipient);
    let Some(record) = registry.iter().find(|peer| peer.id == peer_id) else {
        return Route::Refuse(SendOutcome::NonExistent);
    };

    if !is_online(&peer_id) {
        return Route::Refuse(SendOutcome::NotOnline);
    }

    Route::Deliver {
        peer_id,
        address: record.address.clone(),
    }
}
