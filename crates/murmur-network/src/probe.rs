//! Liveness probing.
//!
//! A peer counts as alive when its listen port is already bound on this
//! host. The probe tries to bind the port itself: `AddrInUse` means some
//! process holds it. This only works for peers on the same machine; a peer
//! on another host whose address cannot be bound locally is reported as not
//! alive. Inter-host deployments should rely on a dial with a short timeout
//! instead (see `NetworkConfig::probe_before_reconnect`).

use crate::normalize_address;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{lookup_host, TcpListener};
use tracing::{debug, trace};

/// Upper bound for resolving a host name before probing.
const RESOLVE_TIMEOUT: Duration = Duration::from_secs(2);

/// Check whether a process is listening on `address`.
///
/// Never fails: anything that cannot be resolved or bound is reported as
/// not alive.
pub async fn probe(address: &str) -> bool {
    let address = normalize_address(address);

    let Some(addr) = resolve(&address).await else {
        debug!(address = %address, "Probe target did not resolve");
        return false;
    };

    let alive = match TcpListener::bind(addr).await {
        Err(e) if e.kind() == ErrorKind::AddrInUse => true,
        Err(e) => {
            trace!(address = %address, error = %e, "Probe bind failed");
            false
        }
        // Released when dropped
        Ok(_listener) => false,
    };

    debug!(address = %address, alive, "Probed peer");
    alive
}

async fn resolve(address: &str) -> Option<SocketAddr> {
    if let Ok(addr) = address.parse::<SocketAddr>() {
        return Some(addr);
    }

    match tokio::time::timeout(RESOLVE_TIMEOUT, lookup_host(address)).await {
        Ok(Ok(mut addrs)) => addrs.next(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_probe_bound_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        assert!(probe(&addr.to_string()).await);
        assert!(probe(&format!("localhost:{}", addr.port())).await);
    }

    #[tokio::test]
    async fn test_probe_free_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        assert!(!probe(&addr.to_string()).await);
        // The probe must not keep the port
        assert!(TcpListener::bind(addr).await.is_ok());
    }

    #[tokio::test]
    async fn test_probe_garbage() {
        assert!(!probe("not an address").await);
        assert!(!probe("").await);
    }
}
