//! Multi-node network tests.
//!
//! Every node runs in-process on a loopback port with its own data
//! directory, so registries and liveness probes behave as in a real
//! single-host deployment.

use crate::harness::{
    contains_address, node_config, wait_for_online, wait_for_registry, TestDataDir, TestNode,
};
use murmur_network::{NetworkConfig, NetworkEvent, PeerId, PeerRecord};
use std::collections::HashSet;
use std::time::Duration;

/// Time for late dials to surface before event streams are inspected.
const SETTLE: Duration = Duration::from_millis(300);

fn ids(peers: &[PeerRecord]) -> HashSet<String> {
    peers.iter().map(|peer| peer.id.to_string()).collect()
}

/// Peers this node connected to through its own dials.
fn dialed_peers(events: &[NetworkEvent]) -> Vec<PeerId> {
    events
        .iter()
        .filter_map(|event| match event {
            NetworkEvent::PeerConnected {
                peer_id,
                outbound: true,
                ..
            } => Some(*peer_id),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Bootstrap
// ============================================================================

#[tokio::test]
async fn test_standalone_node_launches_network() {
    let data = TestDataDir::new();
    let x = TestNode::spawn(&data, None).await;

    let peers = wait_for_registry(&x.handle, |peers| !peers.is_empty()).await;
    assert_eq!(peers, vec![x.record()]);
    assert_eq!(x.handle.list_online_peers().await.unwrap(), vec![x.record()]);

    // Persisted as a pretty-printed JSON array of {id, address}
    let raw = std::fs::read_to_string(data.registry_path(&x)).unwrap();
    assert!(raw.contains('\n'));
    let stored: Vec<PeerRecord> = serde_json::from_str(&raw).unwrap();
    assert_eq!(stored, vec![x.record()]);

    x.stop().await.unwrap();
}

#[tokio::test]
async fn test_bootstrap_to_self_is_ignored() {
    let data = TestDataDir::new();
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);

    let own = format!("127.0.0.1:{}", port);
    let x = TestNode::start(data.storage(), node_config(port, Some(&own))).await;

    let peers = wait_for_registry(&x.handle, |peers| !peers.is_empty()).await;
    assert_eq!(peers, vec![x.record()]);
    assert_eq!(x.handle.connection_count().await.unwrap(), 0);

    x.stop().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_bootstrap_peer() {
    let data = TestDataDir::new();
    let probe = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dead = probe.local_addr().unwrap().to_string();
    drop(probe);

    let mut x = TestNode::spawn(&data, Some(&dead)).await;
    let event = x
        .wait_for_event(|event| matches!(event, NetworkEvent::DialFailed { .. }))
        .await;
    match event {
        NetworkEvent::DialFailed { address, .. } => assert_eq!(address, dead),
        other => panic!("unexpected event: {:?}", other),
    }

    // The node still ends up with a registry holding itself
    let peers = wait_for_registry(&x.handle, |peers| !peers.is_empty()).await;
    assert_eq!(peers, vec![x.record()]);

    x.stop().await.unwrap();
}

// ============================================================================
// Join and gossip
// ============================================================================

#[tokio::test]
async fn test_second_node_joins() {
    let (dx, dy) = (TestDataDir::new(), TestDataDir::new());
    let mut x = TestNode::spawn(&dx, None).await;
    wait_for_registry(&x.handle, |peers| !peers.is_empty()).await;

    let mut y = TestNode::spawn(&dy, Some(&x.address())).await;

    let expected = ids(&[x.record(), y.record()]);
    wait_for_registry(&x.handle, |peers| ids(peers) == expected).await;
    wait_for_registry(&y.handle, |peers| ids(peers) == expected).await;

    let online_x = wait_for_online(&x.handle, |peers| contains_address(peers, &y.address())).await;
    assert_eq!(online_x[0], x.record());
    let online_y = wait_for_online(&y.handle, |peers| contains_address(peers, &x.address())).await;
    assert_eq!(online_y[0], y.record());

    // Only the joining node dials, and only once
    tokio::time::sleep(SETTLE).await;
    assert!(dialed_peers(&x.drain_events()).is_empty());
    assert_eq!(dialed_peers(&y.drain_events()), vec![x.record().id]);
    assert_eq!(x.handle.connection_count().await.unwrap(), 1);
    assert_eq!(y.handle.connection_count().await.unwrap(), 1);

    y.stop().await.unwrap();
    x.stop().await.unwrap();
}

#[tokio::test]
async fn test_third_node_is_gossiped() {
    let (dx, dy, dz) = (TestDataDir::new(), TestDataDir::new(), TestDataDir::new());
    let mut x = TestNode::spawn(&dx, None).await;
    wait_for_registry(&x.handle, |peers| !peers.is_empty()).await;

    let mut y = TestNode::spawn(&dy, Some(&x.address())).await;
    wait_for_online(&x.handle, |peers| contains_address(peers, &y.address())).await;

    let mut z = TestNode::spawn(&dz, Some(&x.address())).await;

    let all = ids(&[x.record(), y.record(), z.record()]);
    for node in [&x, &y, &z] {
        wait_for_registry(&node.handle, |peers| ids(peers) == all).await;
    }

    // Y learned about Z through NEW_PEER and dialed it
    wait_for_online(&y.handle, |peers| contains_address(peers, &z.address())).await;
    let mut z_events = Vec::new();
    z.wait_for_event(|event| {
        z_events.push(event.clone());
        matches!(event, NetworkEvent::PeerAdmitted { .. })
    })
    .await;
    wait_for_online(&z.handle, |peers| {
        contains_address(peers, &x.address()) && contains_address(peers, &y.address())
    })
    .await;

    // No node ever lists itself twice or connects to itself
    for node in [&x, &y, &z] {
        let online = node.handle.list_online_peers().await.unwrap();
        assert_eq!(online.iter().filter(|p| p.id == node.record().id).count(), 1);
        assert_eq!(online[0], node.record());
    }

    // X never dials; Y dials X to join and Z once announced; Z dials only X
    tokio::time::sleep(SETTLE).await;
    z_events.extend(z.drain_events());
    assert!(dialed_peers(&x.drain_events()).is_empty());
    assert_eq!(
        dialed_peers(&y.drain_events()),
        vec![x.record().id, z.record().id]
    );
    assert_eq!(dialed_peers(&z_events), vec![x.record().id]);
    for node in [&x, &y, &z] {
        assert_eq!(node.handle.connection_count().await.unwrap(), 2);
    }

    z.stop().await.unwrap();
    y.stop().await.unwrap();
    x.stop().await.unwrap();
}

// ============================================================================
// Disconnect and reconnect
// ============================================================================

#[tokio::test]
async fn test_disconnect_prunes_online_peers() {
    let (dx, dy) = (TestDataDir::new(), TestDataDir::new());
    let mut x = TestNode::spawn(&dx, None).await;
    let y = TestNode::spawn(&dy, Some(&x.address())).await;
    wait_for_online(&x.handle, |peers| contains_address(peers, &y.address())).await;

    let y_record = y.record();
    y.stop().await.unwrap();

    x.wait_for_event(|event| {
        matches!(event, NetworkEvent::PeerDisconnected { peer_id } if *peer_id == y_record.id)
    })
    .await;
    assert_eq!(x.handle.list_online_peers().await.unwrap(), vec![x.record()]);
    // Registry entries are never removed
    assert!(x.handle.list_peers().await.unwrap().contains(&y_record));

    x.stop().await.unwrap();
}

#[tokio::test]
async fn test_restarted_node_reconnects_from_registry() {
    let (dx, dy, dz) = (TestDataDir::new(), TestDataDir::new(), TestDataDir::new());
    let x = TestNode::spawn(&dx, None).await;
    wait_for_registry(&x.handle, |peers| !peers.is_empty()).await;
    let y = TestNode::spawn(&dy, Some(&x.address())).await;
    wait_for_online(&x.handle, |peers| contains_address(peers, &y.address())).await;
    let z = TestNode::spawn(&dz, Some(&x.address())).await;

    let all = ids(&[x.record(), y.record(), z.record()]);
    for node in [&x, &y, &z] {
        wait_for_registry(&node.handle, |peers| ids(peers) == all).await;
    }

    // Take Y down and wait until the others notice
    let y_address = y.address();
    let y_port = y.local_addr.port();
    y.stop().await.unwrap();
    for node in [&x, &z] {
        wait_for_online(&node.handle, |peers| !contains_address(peers, &y_address)).await;
    }

    // Restart Y on the same address without a bootstrap peer
    let y = TestNode::start(dy.storage(), node_config(y_port, None)).await;
    assert_eq!(y.address(), y_address);

    for node in [&x, &z] {
        wait_for_online(&node.handle, |peers| contains_address(peers, &y_address)).await;
    }
    wait_for_online(&y.handle, |peers| {
        contains_address(peers, &x.address()) && contains_address(peers, &z.address())
    })
    .await;

    // Reconnection adds no duplicate records
    for node in [&x, &y, &z] {
        assert_eq!(node.handle.list_peers().await.unwrap().len(), 3);
    }

    y.stop().await.unwrap();
    z.stop().await.unwrap();
    x.stop().await.unwrap();
}

#[tokio::test]
async fn test_restart_without_probe_dials_directly() {
    let (dx, dy) = (TestDataDir::new(), TestDataDir::new());
    let x = TestNode::spawn(&dx, None).await;
    let y = TestNode::spawn(&dy, Some(&x.address())).await;
    wait_for_registry(&y.handle, |peers| peers.len() == 2).await;

    let y_port = y.local_addr.port();
    y.stop().await.unwrap();
    wait_for_online(&x.handle, |peers| peers.len() == 1).await;

    let config = NetworkConfig {
        probe_before_reconnect: false,
        ..node_config(y_port, None)
    };
    let y = TestNode::start(dy.storage(), config).await;
    wait_for_online(&y.handle, |peers| contains_address(peers, &x.address())).await;
    wait_for_online(&x.handle, |peers| contains_address(peers, &y.address())).await;

    y.stop().await.unwrap();
    x.stop().await.unwrap();
}

#[tokio::test]
async fn test_restart_skips_offline_peers() {
    let (dx, dy) = (TestDataDir::new(), TestDataDir::new());
    let x = TestNode::spawn(&dx, None).await;
    let y = TestNode::spawn(&dy, Some(&x.address())).await;
    wait_for_registry(&y.handle, |peers| peers.len() == 2).await;

    // Both nodes go down; Y comes back alone
    let y_port = y.local_addr.port();
    y.stop().await.unwrap();
    x.stop().await.unwrap();

    let mut y = TestNode::start(dy.storage(), node_config(y_port, None)).await;
    assert_eq!(y.handle.list_peers().await.unwrap().len(), 2);
    assert_eq!(y.handle.list_online_peers().await.unwrap(), vec![y.record()]);

    // The offline peer was probed, not dialed
    let dialed = tokio::time::timeout(std::time::Duration::from_millis(300), async {
        while let Some(event) = y.events.recv().await {
            if matches!(event, NetworkEvent::DialFailed { .. }) {
                return true;
            }
        }
        false
    })
    .await
    .unwrap_or(false);
    assert!(!dialed);

    y.stop().await.unwrap();
}
