//! Gossip protocol engine.
//!
//! Reacts to protocol frames, dial results and closed connections. The
//! engine is owned by the network service task, so handlers run one at a
//! time; the only suspension points are registry requests.

use crate::connection::{spawn_connection, ConnectionEvent};
use crate::messaging::{route, MessageLog, MessageLogEntry, Route, SendOutcome};
use crate::{
    dial, probe, ConnectionConfig, ConnectionId, ConnectionManager, ConnectionState, DialPurpose,
    Direction, Message, NetworkConfig, NetworkEvent, NetworkResult, NodeIdentity, PeerId,
    PeerRecord, RegistryError, RegistryHandle,
};
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

pub(crate) struct GossipEngine {
    identity: NodeIdentity,
    registry: RegistryHandle,
    connections: ConnectionManager,
    log: MessageLog,
    connection_config: ConnectionConfig,
    max_connections: usize,
    conn_events: mpsc::Sender<ConnectionEvent>,
    events: mpsc::Sender<NetworkEvent>,
}

impl GossipEngine {
    pub(crate) fn new(
        identity: NodeIdentity,
        registry: RegistryHandle,
        config: &NetworkConfig,
        conn_events: mpsc::Sender<ConnectionEvent>,
        events: mpsc::Sender<NetworkEvent>,
    ) -> Self {
        Self {
            connections: ConnectionManager::new(identity.id),
            identity,
            registry,
            log: MessageLog::new(),
            connection_config: config.connection.clone(),
            max_connections: config.max_connections,
            conn_events,
            events,
        }
    }

    fn emit(&self, event: NetworkEvent) {
        if let Err(e) = self.events.try_send(event) {
            trace!(error = %e, "Network event dropped");
        }
    }

    // ==================== Bootstrap ====================

    /// Join the network.
    ///
    /// With a bootstrap peer the node dials it; otherwise it reconnects to
    /// the peers of an existing registry, or creates a registry holding only
    /// itself. A registry that cannot be read or created is fatal.
    pub(crate) async fn bootstrap(
        &mut self,
        bootstrap_peer: Option<&str>,
        probe_first: bool,
    ) -> NetworkResult<()> {
        if let Some(target) = bootstrap_peer {
            if !self.identity.is_self(target) {
                info!(target = %target, "Joining network through bootstrap peer");
                self.dial(target, DialPurpose::Join);
                return Ok(());
            }
            warn!(target = %target, "Bootstrap peer is this node, ignoring");
        }

        match self.registry.load().await {
            Ok(peers) => {
                info!(peers = peers.len(), "Existing network detected");
                self.reconnect(peers, probe_first).await;
                Ok(())
            }
            Err(RegistryError::NotFound) => {
                self.registry.create(vec![self.identity.record()]).await?;
                info!(node = %self.identity.id, "New network launched");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to load peer registry");
                Err(e.into())
            }
        }
    }

    async fn reconnect(&mut self, peers: Vec<PeerRecord>, probe_first: bool) {
        for peer in peers {
            if peer.id == self.identity.id {
                continue;
            }
            if probe_first && !probe(&peer.address).await {
                debug!(peer = %peer.id, address = %peer.address, "Peer offline, skipping");
                continue;
            }
            self.dial(&peer.address, DialPurpose::Reconnect);
        }
    }

    /// Create the registry if it does not exist yet.
    async fn ensure_registry(&self) {
        if let Err(e) = self
            .registry
            .merge_or_create(vec![self.identity.record()])
            .await
        {
            error!(error = %e, "Failed to create peer registry");
        }
    }

    // ==================== Connections ====================

    /// Start an outbound dial in the background.
    pub(crate) fn dial(&mut self, address: &str, purpose: DialPurpose) {
        let address = crate::normalize_address(address);
        let peer_id = PeerId::from_address(&address);

        let conn = match self.connections.begin_dial(peer_id) {
            Ok(Some(conn)) => conn,
            Ok(None) => return,
            Err(e) => {
                debug!(address = %address, error = %e, "Dial skipped");
                return;
            }
        };

        debug!(peer = %peer_id, address = %address, ?purpose, "Dialing peer");
        let config = self.connection_config.clone();
        let events = self.conn_events.clone();
        tokio::spawn(async move {
            let result = dial(&address, &config).await;
            let _ = events
                .send(ConnectionEvent::Dialed {
                    conn,
                    peer_id,
                    address,
                    purpose,
                    result,
                })
                .await;
        });
    }

    /// Attach an accepted inbound connection.
    pub(crate) fn accept(&mut self, stream: TcpStream, remote: SocketAddr) {
        if self.connections.inbound_count() >= self.max_connections {
            warn!(addr = %remote, "Max connections reached, rejecting");
            return;
        }

        let conn = self.connections.next_connection_id();
        let tx = spawn_connection(
            conn,
            stream,
            &self.connection_config,
            self.conn_events.clone(),
        );
        self.connections
            .attach(conn, remote.to_string(), Direction::Inbound, tx);
        info!(addr = %remote, conn = %conn, "Incoming connection");
    }

    pub(crate) async fn handle_connection_event(&mut self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Frame { conn, message } => self.on_frame(conn, message).await,
            ConnectionEvent::Closed { conn, reason } => self.on_closed(conn, &reason),
            ConnectionEvent::Dialed {
                conn,
                peer_id,
                address,
                purpose,
                result,
            } => {
                self.connections.end_dial(&peer_id);
                match result {
                    Ok(stream) => self.on_dialed(conn, peer_id, address, purpose, stream),
                    Err(e) => {
                        warn!(address = %address, error = %e, "Outgoing connection failed");
                        self.emit(NetworkEvent::DialFailed {
                            address,
                            error: e.to_string(),
                        });
                        if purpose == DialPurpose::Join {
                            self.ensure_registry().await;
                        }
                    }
                }
            }
        }
    }

    fn on_dialed(
        &mut self,
        conn: ConnectionId,
        peer_id: PeerId,
        address: String,
        purpose: DialPurpose,
        stream: TcpStream,
    ) {
        let tx = spawn_connection(
            conn,
            stream,
            &self.connection_config,
            self.conn_events.clone(),
        );
        self.connections
            .attach(conn, address.clone(), Direction::Outbound, tx);

        let greeting = if purpose.announces_target() {
            Message::target_connection(&self.identity)
        } else {
            Message::admittance(&self.identity)
        };
        if let Err(e) = self.connections.send(conn, greeting) {
            warn!(peer = %peer_id, error = %e, "Failed to greet peer");
        }

        self.register(conn, peer_id, address);
    }

    fn register(&mut self, conn: ConnectionId, peer_id: PeerId, address: String) {
        match self.connections.register(conn, peer_id, address.clone()) {
            Ok(Some(dropped)) if dropped == conn => {
                debug!(peer = %peer_id, conn = %conn, "Peer already connected on another link");
            }
            Ok(_) => {
                let outbound = self.connections.direction_of(conn) == Some(Direction::Outbound);
                info!(peer = %peer_id, address = %address, outbound, "Peer connected");
                self.emit(NetworkEvent::PeerConnected {
                    peer_id,
                    address,
                    outbound,
                });
            }
            Err(e) => warn!(peer = %peer_id, error = %e, "Failed to register connection"),
        }
    }

    fn on_closed(&mut self, conn: ConnectionId, reason: &str) {
        match self.connections.close(conn) {
            Some(peer_id) => {
                info!(peer = %peer_id, reason = %reason, "Peer disconnected");
                self.emit(NetworkEvent::PeerDisconnected { peer_id });
            }
            None => debug!(conn = %conn, reason = %reason, "Connection closed"),
        }
    }

    // ==================== Protocol ====================

    async fn on_frame(&mut self, conn: ConnectionId, message: Message) {
        match message {
            Message::TargetConnection {
                remote_id,
                remote_address,
            } => {
                if let Some(peer) = self.check_announcement(conn, remote_id, &remote_address) {
                    self.on_target_connection(conn, peer).await;
                }
            }
            Message::Connection {
                remote_id,
                remote_address,
            } => {
                if let Some(peer) = self.check_announcement(conn, remote_id, &remote_address) {
                    self.on_connection(conn, peer).await;
                }
            }
            Message::PeersDatabase { peers } => self.on_peers_database(peers).await,
            Message::NewPeer { peer } => self.on_new_peer(peer).await,
            Message::ReconnectedPeer { peer } => self.on_reconnected_peer(peer),
            Message::Admittance {
                remote_id,
                remote_address,
            } => self.on_admittance(conn, remote_id, remote_address),
            Message::Text { sender, message } => {
                info!(sender = %sender, "New message");
                self.log.record_received(&sender, &message);
                self.emit(NetworkEvent::MessageReceived {
                    sender,
                    body: message,
                });
            }
        }
    }

    /// Validate an address announcement; announcements naming this node or
    /// carrying an id that does not match the address are dropped.
    fn check_announcement(
        &self,
        conn: ConnectionId,
        remote_id: PeerId,
        remote_address: &str,
    ) -> Option<PeerRecord> {
        let peer = PeerRecord {
            id: remote_id,
            address: crate::normalize_address(remote_address),
        };

        if !peer.is_consistent() {
            warn!(conn = %conn, peer = %remote_id, address = %remote_address, "Announced id does not match address");
            return None;
        }
        if peer.id == self.identity.id {
            warn!(conn = %conn, "Peer announced this node's own address");
            return None;
        }
        Some(peer)
    }

    async fn on_target_connection(&mut self, conn: ConnectionId, peer: PeerRecord) {
        let known = match self.registry.load().await {
            Ok(peers) => peers.iter().any(|p| p.id == peer.id),
            Err(RegistryError::NotFound) => false,
            Err(e) => {
                warn!(error = %e, "Failed to load peer registry");
                false
            }
        };

        if known {
            info!(peer = %peer.id, address = %peer.address, "Registered node re-connected to network");
            self.push_registry(conn).await;
            let announcement = Message::ReconnectedPeer { peer: peer.clone() };
            self.connections
                .broadcast(&announcement, Some(conn), Some(peer.id));
            self.register(conn, peer.id, peer.address.clone());
            self.emit(NetworkEvent::PeerReconnected { peer });
        } else {
            info!(peer = %peer.id, address = %peer.address, "Non-registered node connected to network");
            if let Err(e) = self.registry.merge_or_create(vec![peer.clone()]).await {
                warn!(peer = %peer.id, error = %e, "Failed to register peer");
            }
            self.push_registry(conn).await;
            let announcement = Message::NewPeer { peer: peer.clone() };
            self.connections
                .broadcast(&announcement, Some(conn), Some(peer.id));
            self.register(conn, peer.id, peer.address.clone());
            self.emit(NetworkEvent::PeerRegistered { peer });
        }
    }

    async fn push_registry(&self, conn: ConnectionId) {
        let peers = match self.registry.load().await {
            Ok(peers) => peers,
            Err(RegistryError::NotFound) => vec![self.identity.record()],
            Err(e) => {
                warn!(conn = %conn, error = %e, "Cannot push peer registry");
                return;
            }
        };

        if let Err(e) = self.connections.send(conn, Message::PeersDatabase { peers }) {
            warn!(conn = %conn, error = %e, "Failed to push peer registry");
        }
    }

    async fn on_connection(&mut self, conn: ConnectionId, peer: PeerRecord) {
        debug!(peer = %peer.id, address = %peer.address, "Connection announcement");
        match self.registry.merge_or_create(vec![peer.clone()]).await {
            Ok(added) if !added.is_empty() => {
                self.emit(NetworkEvent::PeerRegistered { peer: peer.clone() })
            }
            Ok(_) => {}
            Err(e) => warn!(peer = %peer.id, error = %e, "Failed to register peer"),
        }
        self.register(conn, peer.id, peer.address);
    }

    async fn on_peers_database(&mut self, peers: Vec<PeerRecord>) {
        let received = peers.len();
        let peers: Vec<PeerRecord> = peers
            .into_iter()
            .filter(|peer| {
                let consistent = peer.is_consistent();
                if !consistent {
                    warn!(peer = %peer.id, address = %peer.address, "Dropping inconsistent record");
                }
                consistent
            })
            .collect();

        match self.registry.merge_or_create(peers).await {
            Ok(added) => {
                info!(received, added = added.len(), "Peers database updated");
                self.emit(NetworkEvent::RegistrySynced { added: added.len() });
            }
            Err(e) => warn!(error = %e, "Failed to merge peers database"),
        }
    }

    async fn on_new_peer(&mut self, peer: PeerRecord) {
        if !peer.is_consistent() {
            warn!(peer = %peer.id, address = %peer.address, "Dropping inconsistent announcement");
            return;
        }

        match self.registry.merge_or_create(vec![peer.clone()]).await {
            Ok(_) => info!(peer = %peer.id, address = %peer.address, "New peer has been registered"),
            Err(e) => warn!(peer = %peer.id, error = %e, "Failed to register announced peer"),
        }
        self.emit(NetworkEvent::PeerAnnounced {
            peer: peer.clone(),
            reconnected: false,
        });

        if peer.id == self.identity.id
            || self.connections.peer_state(&peer.id) != ConnectionState::Closed
        {
            return;
        }
        self.dial(&peer.address, DialPurpose::Announced);
    }

    fn on_reconnected_peer(&mut self, peer: PeerRecord) {
        if !peer.is_consistent() {
            warn!(peer = %peer.id, address = %peer.address, "Dropping inconsistent announcement");
            return;
        }

        info!(peer = %peer.id, address = %peer.address, "Registered node re-connected to network");
        self.emit(NetworkEvent::PeerAnnounced {
            peer: peer.clone(),
            reconnected: true,
        });

        if peer.id != self.identity.id {
            self.dial(&peer.address, DialPurpose::Announced);
        }
    }

    fn on_admittance(
        &mut self,
        conn: ConnectionId,
        remote_id: Option<PeerId>,
        remote_address: Option<String>,
    ) {
        info!(conn = %conn, peer = ?remote_id, "Admitted");

        if let (Some(id), Some(address)) = (remote_id, remote_address.as_deref()) {
            if let Some(peer) = self.check_announcement(conn, id, address) {
                self.register(conn, peer.id, peer.address);
            }
        }

        self.emit(NetworkEvent::PeerAdmitted { peer_id: remote_id });
    }

    // ==================== Queries ====================

    /// Deliver a user message.
    pub(crate) async fn send_message(&mut self, recipient: &str, body: &str) -> SendOutcome {
        let registry = if self.identity.is_self(recipient) {
            Vec::new()
        } else {
            self.list_peers().await.unwrap_or_else(|e| {
                warn!(error = %e, "Failed to load peer registry");
                Vec::new()
            })
        };

        let route = route(&self.identity, recipient, &registry, |id| {
            self.connections.is_online(id)
        });

        match route {
            Route::Refuse(outcome) => {
                debug!(recipient = %recipient, %outcome, "Message not sent");
                outcome
            }
            Route::Deliver { peer_id, address } => {
                let message = Message::Text {
                    sender: self.identity.address.clone(),
                    message: body.to_string(),
                };
                match self.connections.send_to_peer(&peer_id, message) {
                    Ok(()) => {
                        self.log.record_sent(&address, body);
                        SendOutcome::Success
                    }
                    Err(e) => {
                        warn!(peer = %peer_id, error = %e, "Failed to send message");
                        SendOutcome::NotOnline
                    }
                }
            }
        }
    }

    /// Registered peers; empty before the registry exists.
    pub(crate) async fn list_peers(&self) -> NetworkResult<Vec<PeerRecord>> {
        match self.registry.load().await {
            Ok(peers) => Ok(peers),
            Err(RegistryError::NotFound) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// This node followed by every registered peer with an open connection.
    pub(crate) async fn online_peers(&self) -> Vec<PeerRecord> {
        let mut online = vec![self.identity.record()];
        match self.list_peers().await {
            Ok(peers) => online.extend(peers.into_iter().filter(|peer| {
                peer.id != self.identity.id && self.connections.is_online(&peer.id)
            })),
            Err(e) => warn!(error = %e, "Failed to load peer registry"),
        }
        online
    }

    pub(crate) fn sent_messages(&self) -> Vec<MessageLogEntry> {
        self.log.sent()
    }

    pub(crate) fn received_messages(&self) -> Vec<MessageLogEntry> {
        self.log.received()
    }

    pub(crate) fn connection_count(&self) -> usize {
        self.connections.open_connections().len()
    }

    pub(crate) fn shutdown(&mut self) {
        self.connections.clear();
    }
}
