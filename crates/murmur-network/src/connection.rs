//! Connection handling.
//!
//! Every open TCP connection is driven by its own task which decodes
//! inbound frames into [`ConnectionEvent`]s and writes queued outbound
//! messages. The service owns the sending half of the outbound queue;
//! dropping it closes the connection.

use crate::{Message, MessageCodec, NetworkError, NetworkResult, PeerId, MAX_MESSAGE_SIZE};
use futures::stream::StreamExt;
use futures::SinkExt;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{debug, instrument, warn};

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Maximum message size.
    pub max_message_size: usize,
    /// Capacity of each connection's outbound queue.
    pub outbound_buffer: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            max_message_size: MAX_MESSAGE_SIZE,
            outbound_buffer: 256,
        }
    }
}

/// Process-local connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Which side opened a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Accepted by our listener.
    Inbound,
    /// Dialed by this node.
    Outbound,
}

/// Why an outbound dial was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialPurpose {
    /// Bootstrap toward a target peer.
    Join,
    /// Reconnect to a peer from the local registry after a restart.
    Reconnect,
    /// Dial a peer announced by `NEW_PEER` or `RECONNECTED_PEER`.
    Announced,
}

impl DialPurpose {
    /// Whether the dial opens with `TARGET_CONNECTION`.
    pub fn announces_target(&self) -> bool {
        matches!(self, DialPurpose::Join | DialPurpose::Reconnect)
    }
}

/// Events reported by connection and dial tasks.
#[derive(Debug)]
pub(crate) enum ConnectionEvent {
    /// A frame was decoded.
    Frame {
        conn: ConnectionId,
        message: Message,
    },
    /// The connection ended.
    Closed {
        conn: ConnectionId,
        reason: String,
    },
    /// An outbound dial finished.
    Dialed {
        conn: ConnectionId,
        peer_id: PeerId,
        address: String,
        purpose: DialPurpose,
        result: NetworkResult<TcpStream>,
    },
}

/// Open a TCP connection to `address`.
#[instrument(skip(config))]
pub async fn dial(address: &str, config: &ConnectionConfig) -> NetworkResult<TcpStream> {
    let stream = tokio::time::timeout(config.connect_timeout, TcpStream::connect(address))
        .await
        .map_err(|_| NetworkError::Timeout(format!("Connection to {} timed out", address)))?
        .map_err(|e| NetworkError::ConnectionFailed(format!("{}: {}", address, e)))?;

    stream.set_nodelay(true)?;
    debug!("Connected to {}", address);

    Ok(stream)
}

/// Start the task driving `stream` and return its outbound queue.
pub(crate) fn spawn_connection(
    conn: ConnectionId,
    stream: TcpStream,
    config: &ConnectionConfig,
    events: mpsc::Sender<ConnectionEvent>,
) -> mpsc::Sender<Message> {
    let (tx, rx) = mpsc::channel(config.outbound_buffer);
    let codec = MessageCodec::with_max_size(config.max_message_size);

    tokio::spawn(async move {
        let reason = drive_connection(conn, Framed::new(stream, codec), rx, &events).await;
        debug!(conn = %conn, reason = %reason, "Connection task finished");
        let _ = events.send(ConnectionEvent::Closed { conn, reason }).await;
    });

    tx
}

async fn drive_connection(
    conn: ConnectionId,
    framed: Framed<TcpStream, MessageCodec>,
    mut outbound: mpsc::Receiver<Message>,
    events: &mpsc::Sender<ConnectionEvent>,
) -> String {
    let (mut sink, mut stream) = framed.split();

    loop {
        tokio::select! {
            // Incoming frames
            result = stream.next() => {
                match result {
                    Some(Ok(message)) => {
                        debug!(conn = %conn, msg = %message.message_type(), "Received message");
                        if events.send(ConnectionEvent::Frame { conn, message }).await.is_err() {
                            return "service stopped".to_string();
                        }
                    }
                    Some(Err(e)) => {
                        warn!(conn = %conn, error = %e, "Receive error");
                        return e.to_string();
                    }
                    None => return "closed by peer".to_string(),
                }
            }

            // Outgoing messages
            message = outbound.recv() => {
                let Some(message) = message else {
                    return "closed locally".to_string();
                };
                let msg_type = message.message_type();
                if let Err(e) = sink.send(message).await {
                    warn!(conn = %conn, error = %e, "Send error");
                    return e.to_string();
                }
                debug!(conn = %conn, msg = %msg_type, "Sent message");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NodeIdentity;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    #[test]
    fn test_connection_config_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.max_message_size, MAX_MESSAGE_SIZE);
    }

    #[test]
    fn test_dial_purpose() {
        assert!(DialPurpose::Join.announces_target());
        assert!(DialPurpose::Reconnect.announces_target());
        assert!(!DialPurpose::Announced.announces_target());
    }

    #[tokio::test]
    async fn test_dial_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = dial(&addr.to_string(), &ConnectionConfig::default())
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::ConnectionFailed(_)));
    }

    #[tokio::test]
    async fn test_dial_times_out_when_backlog_is_full() {
        // A listener that never accepts; once its backlog fills, further
        // handshakes are left unanswered
        let socket = tokio::net::TcpSocket::new_v4().unwrap();
        socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let listener = socket.listen(1).unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let config = ConnectionConfig {
            connect_timeout: Duration::from_millis(200),
            ..Default::default()
        };
        let mut held = Vec::new();
        let mut timed_out = false;
        for _ in 0..64 {
            match dial(&addr, &config).await {
                Ok(stream) => held.push(stream),
                Err(NetworkError::Timeout(message)) => {
                    assert!(message.contains(&addr));
                    timed_out = true;
                    break;
                }
                Err(e) => panic!("unexpected dial error: {}", e),
            }
        }
        assert!(timed_out, "{} dials completed without a timeout", held.len());
    }

    #[tokio::test]
    async fn test_connection_frames_both_ways() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = ConnectionConfig::default();

        let stream = dial(&addr.to_string(), &config).await.unwrap();
        let (remote, _) = listener.accept().await.unwrap();
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let tx = spawn_connection(ConnectionId(1), stream, &config, events_tx);

        // Outbound message arrives as one JSON line
        let identity = NodeIdentity::new(&addr.to_string());
        tx.send(Message::target_connection(&identity)).await.unwrap();
        let mut remote = BufReader::new(remote);
        let mut line = String::new();
        remote.read_line(&mut line).await.unwrap();
        assert_eq!(
            Message::decode(line.trim_end().as_bytes()).unwrap(),
            Message::target_connection(&identity)
        );

        // Inbound line becomes a frame event
        remote
            .get_mut()
            .write_all(b"{\"type\":\"ADMITTANCE\"}\n")
            .await
            .unwrap();
        match events_rx.recv().await.unwrap() {
            ConnectionEvent::Frame { conn, message } => {
                assert_eq!(conn, ConnectionId(1));
                assert_eq!(message.message_type(), crate::MessageType::Admittance);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        // Malformed input closes the connection
        remote.get_mut().write_all(b"garbage\n").await.unwrap();
        match events_rx.recv().await.unwrap() {
            ConnectionEvent::Closed { conn, .. } => assert_eq!(conn, ConnectionId(1)),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dropping_sender_closes() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let config = ConnectionConfig::default();

        let stream = dial(&addr.to_string(), &config).await.unwrap();
        let (_remote, _) = listener.accept().await.unwrap();
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let tx = spawn_connection(ConnectionId(7), stream, &config, events_tx);
        drop(tx);

        match events_rx.recv().await.unwrap() {
            ConnectionEvent::Closed { conn, reason } => {
                assert_eq!(conn, ConnectionId(7));
                assert_eq!(reason, "closed locally");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
