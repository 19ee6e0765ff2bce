//! Murmur Node - a peer-to-peer gossip and messaging node.
//!
//! This is the main entry point for the murmur-node binary.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

mod config;
mod node;

use config::NodeConfig;
use node::Node;

/// Peer-to-peer gossip and messaging node.
#[derive(Parser, Debug)]
#[command(name = "murmur-node")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "murmur-node.toml")]
    config: PathBuf,

    /// Data directory
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Host to listen on for P2P connections
    #[arg(long, env = "ADDRESS")]
    address: Option<String>,

    /// P2P port
    #[arg(long, env = "P2P_PORT")]
    p2p_port: Option<u16>,

    /// P2P bind address (host:port); takes precedence over --address/--p2p-port
    #[arg(long)]
    p2p_bind: Option<String>,

    /// Address announced to peers, if different from the bind address
    #[arg(long)]
    declared_address: Option<String>,

    /// Peer to join the network through (host:port)
    #[arg(long, env = "TARGET_PEER")]
    bootstrap: Option<String>,

    /// HTTP API port
    #[arg(long, env = "HTTP_PORT")]
    http_port: Option<u16>,

    /// API bind address (host:port); takes precedence over --http-port
    #[arg(long)]
    api_bind: Option<String>,

    /// Dial every known peer on restart instead of probing local ports first
    #[arg(long)]
    no_probe: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Murmur Node v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = NodeConfig::load(&args.config, &args)?;

    info!("Data directory: {:?}", config.data_dir);
    info!("API: {}", config.api.bind_address);
    info!("P2P: {}", config.network.bind_address);
    if let Some(ref peer) = config.network.bootstrap_peer {
        info!("Bootstrap peer: {}", peer);
    }

    let node = Node::new(config)?;

    // Handle shutdown signals
    let node_handle = node.clone();
    let shutdown_signal = async move {
        tokio::signal::ctrl_c().await.ok();
        info!("Shutdown signal received");
        node_handle.shutdown().await;
    };

    // Run the node until shutdown
    tokio::select! {
        result = node.run() => {
            if let Err(e) = result {
                tracing::error!("Node error: {:#}", e);
            }
        }
        _ = shutdown_signal => {
            info!("Shutdown complete");
        }
    }

    info!("Murmur node stopped");
    Ok(())
}
