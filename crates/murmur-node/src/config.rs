//! Node configuration.

use crate::Args;
use anyhow::{Context, Result};
use murmur_network::{
    normalize_address, ConnectionConfig, NetworkConfig, RegistryConfig, DEFAULT_P2P_PORT,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node name.
    #[serde(default = "default_node_name")]
    pub node_name: String,
    /// Data directory. Registries live under `<data_dir>/<node id>/`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// P2P configuration.
    #[serde(default)]
    pub network: P2pConfig,
    /// API configuration.
    #[serde(default)]
    pub api: ApiConfig,
}

fn default_node_name() -> String {
    "murmur-node".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("databases")
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_name: default_node_name(),
            data_dir: default_data_dir(),
            network: P2pConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

/// P2P configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct P2pConfig {
    /// P2P bind address.
    pub bind_address: String,
    /// Address announced to peers.
    pub declared_address: Option<String>,
    /// Peer to join through on startup.
    pub bootstrap_peer: Option<String>,
    /// Probe known peers before reconnecting after a restart.
    pub probe_before_reconnect: bool,
    /// Maximum accepted connections.
    pub max_connections: usize,
    /// Dial timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Registry storage timeout in seconds.
    pub storage_timeout_secs: u64,
    /// Attempts for a failing registry merge.
    pub merge_attempts: u32,
}

impl Default for P2pConfig {
    fn default() -> Self {
        Self {
            bind_address: format!("127.0.0.1:{}", DEFAULT_P2P_PORT),
            declared_address: None,
            bootstrap_peer: None,
            probe_before_reconnect: true,
            max_connections: 50,
            connect_timeout_secs: 10,
            storage_timeout_secs: 5,
            merge_attempts: 3,
        }
    }
}

/// API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// API bind address.
    pub bind_address: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_address: format!("127.0.0.1:{}", murmur_api::DEFAULT_API_PORT),
        }
    }
}

impl NodeConfig {
    /// Load configuration from file and CLI args.
    pub fn load(config_path: &Path, args: &Args) -> Result<Self> {
        let mut config = if config_path.exists() {
            let content =
                std::fs::read_to_string(config_path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")?
        } else {
            Self::default()
        };

        config.apply_args(args);
        Ok(config)
    }

    fn apply_args(&mut self, args: &Args) {
        if let Some(ref data_dir) = args.data_dir {
            self.data_dir = data_dir.clone();
        }

        // Host and port may be given separately, as environment variables
        if args.address.is_some() || args.p2p_port.is_some() {
            let (host, port) = split_host_port(&self.network.bind_address);
            let host = args.address.clone().unwrap_or(host);
            let port = args.p2p_port.or(port).unwrap_or(DEFAULT_P2P_PORT);
            self.network.bind_address = format!("{}:{}", host, port);
        }
        if let Some(ref p2p_bind) = args.p2p_bind {
            self.network.bind_address = p2p_bind.clone();
        }
        if let Some(ref declared) = args.declared_address {
            self.network.declared_address = Some(declared.clone());
        }
        if let Some(ref peer) = args.bootstrap {
            self.network.bootstrap_peer = Some(peer.clone());
        }
        if args.no_probe {
            self.network.probe_before_reconnect = false;
        }

        if let Some(port) = args.http_port {
            let (host, _) = split_host_port(&self.api.bind_address);
            self.api.bind_address = format!("{}:{}", host, port);
        }
        if let Some(ref api_bind) = args.api_bind {
            self.api.bind_address = api_bind.clone();
        }
    }

    /// Build the network service configuration.
    pub fn network_config(&self) -> Result<NetworkConfig> {
        let listen_addr = parse_socket_addr(&self.network.bind_address)
            .with_context(|| format!("Invalid P2P bind address {}", self.network.bind_address))?;

        Ok(NetworkConfig {
            listen_addr,
            declared_address: self.network.declared_address.clone(),
            bootstrap_peer: self.network.bootstrap_peer.clone(),
            probe_before_reconnect: self.network.probe_before_reconnect,
            max_connections: self.network.max_connections,
            connection: ConnectionConfig {
                connect_timeout: Duration::from_secs(self.network.connect_timeout_secs),
                ..Default::default()
            },
            registry: RegistryConfig {
                storage_timeout: Duration::from_secs(self.network.storage_timeout_secs),
                merge_attempts: self.network.merge_attempts.max(1),
                ..Default::default()
            },
        })
    }

    /// Parsed API bind address.
    pub fn api_addr(&self) -> Result<SocketAddr> {
        parse_socket_addr(&self.api.bind_address)
            .with_context(|| format!("Invalid API bind address {}", self.api.bind_address))
    }
}

/// Parse `host:port`, accepting `localhost` as the host.
fn parse_socket_addr(address: &str) -> Result<SocketAddr> {
    Ok(normalize_address(address).parse()?)
}

fn split_host_port(address: &str) -> (String, Option<u16>) {
    match address.rsplit_once(':') {
        Some((host, port)) => (host.to_string(), port.parse().ok()),
        None => (address.to_string(), None),
    }
}
