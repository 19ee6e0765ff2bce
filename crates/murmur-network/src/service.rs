//! Network service.
//!
//! One task owns the listener, the connection set and the gossip engine and
//! multiplexes accepts, connection events and collaborator commands.
//! Collaborators talk to it through a [`NetworkHandle`].

use crate::connection::ConnectionEvent;
use crate::gossip::GossipEngine;
use crate::messaging::{MessageLogEntry, SendOutcome};
use crate::{
    ConnectionConfig, NetworkError, NetworkResult, NodeIdentity, PeerId, PeerRecord,
    PeerRegistry, RegistryConfig, DEFAULT_P2P_PORT,
};
use murmur_storage::Storage;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};

/// Network service configuration.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Listen address.
    pub listen_addr: SocketAddr,
    /// Address announced to peers. Defaults to the bound listen address.
    pub declared_address: Option<String>,
    /// Peer to join through on startup.
    pub bootstrap_peer: Option<String>,
    /// Probe registry peers before reconnecting to them after a restart.
    pub probe_before_reconnect: bool,
    /// Maximum number of accepted connections.
    pub max_connections: usize,
    /// Connection configuration.
    pub connection: ConnectionConfig,
    /// Peer registry configuration.
    pub registry: RegistryConfig,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_P2P_PORT),
            declared_address: None,
            bootstrap_peer: None,
            probe_before_reconnect: true,
            max_connections: 50,
            connection: ConnectionConfig::default(),
            registry: RegistryConfig::default(),
        }
    }
}

/// Events emitted by the network service.
#[derive(Debug, Clone)]
pub enum NetworkEvent {
    /// A connection was registered under a peer id.
    PeerConnected {
        peer_id: PeerId,
        address: String,
        outbound: bool,
    },
    /// A registered connection closed.
    PeerDisconnected { peer_id: PeerId },
    /// A previously unknown peer joined through this node.
    PeerRegistered { peer: PeerRecord },
    /// A known peer rejoined through this node.
    PeerReconnected { peer: PeerRecord },
    /// Another node announced a new or returning peer.
    PeerAnnounced { peer: PeerRecord, reconnected: bool },
    /// An announced peer dialed this node.
    PeerAdmitted { peer_id: Option<PeerId> },
    /// A peers database was merged into the registry.
    RegistrySynced { added: usize },
    /// A user message arrived.
    MessageReceived { sender: String, body: String },
    /// An outbound dial failed.
    DialFailed { address: String, error: String },
}

/// Commands sent to the network service.
#[derive(Debug)]
enum NetworkCommand {
    ListPeers {
        response_tx: oneshot::Sender<NetworkResult<Vec<PeerRecord>>>,
    },
    ListOnlinePeers {
        response_tx: oneshot::Sender<Vec<PeerRecord>>,
    },
    SendMessage {
        recipient: String,
        body: String,
        response_tx: oneshot::Sender<SendOutcome>,
    },
    SentMessages {
        response_tx: oneshot::Sender<Vec<MessageLogEntry>>,
    },
    ReceivedMessages {
        response_tx: oneshot::Sender<Vec<MessageLogEntry>>,
    },
    ConnectionCount {
        response_tx: oneshot::Sender<usize>,
    },
    Shutdown,
}

/// Cloneable handle to a running network service.
#[derive(Clone)]
pub struct NetworkHandle {
    identity: NodeIdentity,
    command_tx: mpsc::Sender<NetworkCommand>,
}

impl NetworkHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> NetworkCommand,
    ) -> NetworkResult<T> {
        let (response_tx, response_rx) = oneshot::channel();
        self.command_tx
            .send(make(response_tx))
            .await
            .map_err(|_| NetworkError::ServiceStopped)?;
        response_rx.await.map_err(|_| NetworkError::ServiceStopped)
    }

    /// Identity of the node.
    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    /// Every peer in the registry, self included.
    pub async fn list_peers(&self) -> NetworkResult<Vec<PeerRecord>> {
        self.request(|response_tx| NetworkCommand::ListPeers { response_tx })
            .await?
    }

    /// This node followed by every registered peer with an open connection.
    pub async fn list_online_peers(&self) -> NetworkResult<Vec<PeerRecord>> {
        self.request(|response_tx| NetworkCommand::ListOnlinePeers { response_tx })
            .await
    }

    /// Send `body` to the peer listening on `recipient`.
    pub async fn send_message(&self, recipient: &str, body: &str) -> NetworkResult<SendOutcome> {
        self.request(|response_tx| NetworkCommand::SendMessage {
            recipient: recipient.to_string(),
            body: body.to_string(),
            response_tx,
        })
        .await
    }

    /// Messages sent this session, newest first.
    pub async fn sent_messages(&self) -> NetworkResult<Vec<MessageLogEntry>> {
        self.request(|response_tx| NetworkCommand::SentMessages { response_tx })
            .await
    }

    /// Messages received this session, newest first.
    pub async fn received_messages(&self) -> NetworkResult<Vec<MessageLogEntry>> {
        self.request(|response_tx| NetworkCommand::ReceivedMessages { response_tx })
            .await
    }

    /// Number of open registered connections.
    pub async fn connection_count(&self) -> NetworkResult<usize> {
        self.request(|response_tx| NetworkCommand::ConnectionCount { response_tx })
            .await
    }

    /// Stop the service and close every connection.
    pub async fn shutdown(&self) -> NetworkResult<()> {
        self.command_tx
            .send(NetworkCommand::Shutdown)
            .await
            .map_err(|_| NetworkError::ServiceStopped)
    }
}

/// Network service managing all P2P connections.
pub struct NetworkService {
    config: NetworkConfig,
    listener: TcpListener,
    engine: GossipEngine,
    conn_events: mpsc::Receiver<ConnectionEvent>,
    command_rx: mpsc::Receiver<NetworkCommand>,
}

impl NetworkService {
    /// Bind the listener and prepare the service.
    ///
    /// The node identity is derived from `declared_address`, or from the
    /// bound address when none is declared.
    pub async fn bind(
        config: NetworkConfig,
        storage: Arc<dyn Storage>,
    ) -> NetworkResult<(Self, NetworkHandle, mpsc::Receiver<NetworkEvent>)> {
        let listener = TcpListener::bind(config.listen_addr).await?;
        let local_addr = listener.local_addr()?;

        let address = config
            .declared_address
            .clone()
            .unwrap_or_else(|| advertised_address(local_addr).to_string());
        let identity = NodeIdentity::new(&address);
        info!(addr = %local_addr, address = %identity.address, node = %identity.id, "Listening for P2P connections");

        let registry = PeerRegistry::spawn(storage, &identity, config.registry.clone());
        let (event_tx, event_rx) = mpsc::channel(1000);
        let (command_tx, command_rx) = mpsc::channel(100);
        let (conn_tx, conn_rx) = mpsc::channel(1000);

        let engine = GossipEngine::new(identity.clone(), registry, &config, conn_tx, event_tx);
        let service = Self {
            config,
            listener,
            engine,
            conn_events: conn_rx,
            command_rx,
        };
        let handle = NetworkHandle {
            identity,
            command_tx,
        };

        Ok((service, handle, event_rx))
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> NetworkResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Bootstrap, then run until shut down.
    ///
    /// Returns an error only if the initial registry cannot be read or created.
    pub async fn run(self) -> NetworkResult<()> {
        let NetworkService {
            config,
            listener,
            mut engine,
            mut conn_events,
            mut command_rx,
        } = self;

        engine
            .bootstrap(config.bootstrap_peer.as_deref(), config.probe_before_reconnect)
            .await?;

        loop {
            tokio::select! {
                // Accept incoming connections
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => engine.accept(stream, addr),
                        Err(e) => error!("Accept error: {}", e),
                    }
                }

                // Frames, closed connections and dial results
                Some(event) = conn_events.recv() => {
                    engine.handle_connection_event(event).await;
                }

                // Handle commands
                command = command_rx.recv() => {
                    match command {
                        Some(NetworkCommand::Shutdown) | None => {
                            info!("Network service shutting down");
                            break;
                        }
                        Some(command) => handle_command(&mut engine, command).await,
                    }
                }
            }
        }

        engine.shutdown();
        Ok(())
    }
}

async fn handle_command(engine: &mut GossipEngine, command: NetworkCommand) {
    match command {
        NetworkCommand::ListPeers { response_tx } => {
            let _ = response_tx.send(engine.list_peers().await);
        }
        NetworkCommand::ListOnlinePeers { response_tx } => {
            let _ = response_tx.send(engine.online_peers().await);
        }
        NetworkCommand::SendMessage {
            recipient,
            body,
            response_tx,
        } => {
            let _ = response_tx.send(engine.send_message(&recipient, &body).await);
        }
        NetworkCommand::SentMessages { response_tx } => {
            let _ = response_tx.send(engine.sent_messages());
        }
        NetworkCommand::ReceivedMessages { response_tx } => {
            let _ = response_tx.send(engine.received_messages());
        }
        NetworkCommand::ConnectionCount { response_tx } => {
            let _ = response_tx.send(engine.connection_count());
        }
        NetworkCommand::Shutdown => {}
    }
}

/// Replace an unspecified bind IP with loopback.
fn advertised_address(local_addr: SocketAddr) -> SocketAddr {
    if local_addr.ip().is_unspecified() {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), local_addr.port())
    } else {
        local_addr
    }
}
