//! Connection manager.
//!
//! Tracks every live link (an attached connection task) and the subset of
//! links that have been registered under a peer id. Only registered links
//! are [`ConnectionEntry`]s; an inbound link becomes one once the remote
//! side announces itself.
//!
//! At most one link per peer survives registration. When two nodes dial
//! each other, both sides keep the link opened by the node with the
//! smaller id and drop the other.

use crate::{ConnectionId, Direction, Message, NetworkError, NetworkResult, PeerId};
use std::collections::HashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Dial in flight.
    Connecting,
    /// Connection task running.
    Open,
    /// Unknown or closed.
    Closed,
}

/// An open connection registered under a peer id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEntry {
    /// Remote peer.
    pub peer_id: PeerId,
    /// Connection carrying traffic to the peer.
    pub connection: ConnectionId,
    /// Announced listen address of the peer.
    pub address: String,
}

/// An attached connection task.
struct Link {
    direction: Direction,
    tx: mpsc::Sender<Message>,
    peer: Option<PeerId>,
}

/// Owner of the live connection set.
pub struct ConnectionManager {
    self_id: PeerId,
    next_id: u64,
    links: HashMap<ConnectionId, Link>,
    entries: HashMap<PeerId, ConnectionEntry>,
    dialing: HashMap<PeerId, ConnectionId>,
}

impl ConnectionManager {
    /// Create an empty manager for the node `self_id`.
    pub fn new(self_id: PeerId) -> Self {
        Self {
            self_id,
            next_id: 0,
            links: HashMap::new(),
            entries: HashMap::new(),
            dialing: HashMap::new(),
        }
    }

    /// Allocate a connection id.
    pub fn next_connection_id(&mut self) -> ConnectionId {
        self.next_id += 1;
        ConnectionId(self.next_id)
    }

    /// Reserve a dial to `peer_id`.
    ///
    /// Returns `None` when a dial to the peer is already in flight.
    pub fn begin_dial(&mut self, peer_id: PeerId) -> NetworkResult<Option<ConnectionId>> {
        if peer_id == self.self_id {
            return Err(NetworkError::SelfConnection(peer_id.to_string()));
        }
        if self.dialing.contains_key(&peer_id) {
            debug!(peer = %peer_id, "Dial already in flight");
            return Ok(None);
        }

        let conn = self.next_connection_id();
        self.dialing.insert(peer_id, conn);
        Ok(Some(conn))
    }

    /// Release the dial reservation for `peer_id`.
    pub fn end_dial(&mut self, peer_id: &PeerId) {
        self.dialing.remove(peer_id);
    }

    /// Attach a running connection task.
    pub fn attach(
        &mut self,
        conn: ConnectionId,
        remote: String,
        direction: Direction,
        tx: mpsc::Sender<Message>,
    ) {
        debug!(conn = %conn, remote = %remote, ?direction, "Connection attached");
        self.links.insert(
            conn,
            Link {
                direction,
                tx,
                peer: None,
            },
        );
    }

    /// Register `conn` as the connection to `peer_id`.
    ///
    /// If another link is already registered for the peer, one of the two
    /// is dropped: the link dialed by the node with the smaller id wins,
    /// and between links dialed by the same node the newer one wins.
    /// Returns the dropped link, which may be `conn` itself.
    pub fn register(
        &mut self,
        conn: ConnectionId,
        peer_id: PeerId,
        address: String,
    ) -> NetworkResult<Option<ConnectionId>> {
        if peer_id == self.self_id {
            return Err(NetworkError::SelfConnection(address));
        }

        let link = self.links.get(&conn).ok_or(NetworkError::ConnectionClosed)?;
        if link.tx.is_closed() {
            return Err(NetworkError::ConnectionClosed);
        }
        let dialer = self.dialer_of(link.direction, peer_id);

        let current = self
            .entries
            .get(&peer_id)
            .map(|entry| entry.connection)
            .filter(|current| *current != conn)
            .and_then(|current| {
                let link = self.links.get(&current)?;
                (!link.tx.is_closed()).then_some((current, link.direction))
            });

        if let Some((current, direction)) = current {
            if self.dialer_of(direction, peer_id) < dialer {
                debug!(peer = %peer_id, kept = %current, dropped = %conn, "Duplicate connection dropped");
                self.drop_link(conn);
                return Ok(Some(conn));
            }
        }

        if let Some(previous_peer) = self.links.get_mut(&conn).and_then(|l| l.peer.replace(peer_id)) {
            if previous_peer != peer_id
                && self.entries.get(&previous_peer).map(|e| e.connection) == Some(conn)
            {
                self.entries.remove(&previous_peer);
            }
        }

        let replaced = self
            .entries
            .insert(
                peer_id,
                ConnectionEntry {
                    peer_id,
                    connection: conn,
                    address,
                },
            )
            .map(|old| old.connection)
            .filter(|old| *old != conn);

        match replaced {
            Some(old) => {
                debug!(peer = %peer_id, kept = %conn, dropped = %old, "Duplicate connection dropped");
                self.drop_link(old);
                Ok(Some(old))
            }
            None => Ok(None),
        }
    }

    /// Node that opened a link in `direction` to or from `peer_id`.
    fn dialer_of(&self, direction: Direction, peer_id: PeerId) -> PeerId {
        match direction {
            Direction::Outbound => self.self_id,
            Direction::Inbound => peer_id,
        }
    }

    /// Forget a link without reporting a disconnect for it.
    fn drop_link(&mut self, conn: ConnectionId) {
        if let Some(link) = self.links.remove(&conn) {
            if let Some(peer_id) = link.peer {
                if self.entries.get(&peer_id).map(|e| e.connection) == Some(conn) {
                    self.entries.remove(&peer_id);
                }
            }
        }
    }

    /// State of the connection to `peer_id`.
    pub fn peer_state(&self, peer_id: &PeerId) -> ConnectionState {
        if self.is_online(peer_id) {
            ConnectionState::Open
        } else if self.dialing.contains_key(peer_id) {
            ConnectionState::Connecting
        } else {
            ConnectionState::Closed
        }
    }

    /// Registered entries whose connection is still open.
    pub fn open_connections(&self) -> Vec<&ConnectionEntry> {
        self.entries
            .values()
            .filter(|entry| self.is_link_open(entry.connection))
            .collect()
    }

    /// Check whether an open connection to `peer_id` exists.
    pub fn is_online(&self, peer_id: &PeerId) -> bool {
        self.entries
            .get(peer_id)
            .is_some_and(|entry| self.is_link_open(entry.connection))
    }

    /// Peer registered on `conn`, if any.
    pub fn peer_of(&self, conn: ConnectionId) -> Option<PeerId> {
        self.links.get(&conn).and_then(|link| link.peer)
    }

    /// Direction of `conn`.
    pub fn direction_of(&self, conn: ConnectionId) -> Option<Direction> {
        self.links.get(&conn).map(|link| link.direction)
    }

    fn is_link_open(&self, conn: ConnectionId) -> bool {
        self.links.get(&conn).is_some_and(|link| !link.tx.is_closed())
    }

    /// Queue `message` on `conn`.
    pub fn send(&self, conn: ConnectionId, message: Message) -> NetworkResult<()> {
        let link = self.links.get(&conn).ok_or(NetworkError::ConnectionClosed)?;
        match link.tx.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(conn = %conn, "Outbound queue full, dropping message");
                Err(NetworkError::ConnectionFailed(format!(
                    "outbound queue of {} is full",
                    conn
                )))
            }
            Err(TrySendError::Closed(_)) => Err(NetworkError::ConnectionClosed),
        }
    }

    /// Queue `message` on the connection registered for `peer_id`.
    pub fn send_to_peer(&self, peer_id: &PeerId, message: Message) -> NetworkResult<()> {
        let entry = self
            .entries
            .get(peer_id)
            .ok_or(NetworkError::ConnectionClosed)?;
        self.send(entry.connection, message)
    }

    /// Send `message` on every open link except `skip_conn` and links
    /// registered under `skip_peer`. Returns the number of links reached.
    pub fn broadcast(
        &self,
        message: &Message,
        skip_conn: Option<ConnectionId>,
        skip_peer: Option<PeerId>,
    ) -> usize {
        let mut sent = 0;
        for (conn, link) in &self.links {
            if Some(*conn) == skip_conn || (link.peer.is_some() && link.peer == skip_peer) {
                continue;
            }
            if link.tx.is_closed() {
                continue;
            }
            if self.send(*conn, message.clone()).is_ok() {
                sent += 1;
            }
        }
        debug!(msg = %message.message_type(), sent, "Broadcast");
        sent
    }

    /// Detach `conn`, dropping its outbound queue.
    ///
    /// Returns the peer whose entry was pruned.
    pub fn close(&mut self, conn: ConnectionId) -> Option<PeerId> {
        let link = self.links.remove(&conn)?;
        let peer_id = link.peer?;

        match self.entries.get(&peer_id) {
            Some(entry) if entry.connection == conn => {
                self.entries.remove(&peer_id);
                Some(peer_id)
            }
            _ => None,
        }
    }

    /// Number of attached links.
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Number of attached inbound links.
    pub fn inbound_count(&self) -> usize {
        self.links
            .values()
            .filter(|link| link.direction == Direction::Inbound)
            .count()
    }

    /// Drop every link and entry.
    pub fn clear(&mut self) {
        self.links.clear();
        self.entries.clear();
        self.dialing.clear();
    }
}
