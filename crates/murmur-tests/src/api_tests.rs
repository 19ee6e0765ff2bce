//! API route tests.
//!
//! These tests verify API endpoint behavior including:
//! - Correct response formats
//! - Message outcomes
//! - Input validation
//! - Behavior once the network service has stopped

use crate::harness::{
    contains_address, node_config, wait_for_online, wait_for_registry, TestDataDir, TestNode,
};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use murmur_api::AppState;
use murmur_network::NetworkEvent;
use murmur_storage::MemoryStorage;
use http_body_util::BodyExt;

use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

/// Start a standalone node on in-memory storage and build its API router.
async fn create_test_api() -> (Router, TestNode) {
    let node = TestNode::start(Arc::new(MemoryStorage::new()), node_config(0, None)).await;
    wait_for_registry(&node.handle, |peers| !peers.is_empty()).await;

    let app_state = AppState::new(node.handle.clone(), "test-node".to_string());
    let router = murmur_api::build_api(app_state);
    (router, node)
}

/// Helper to make a GET request and get response body as JSON.
async fn get_json(router: &Router, path: &str) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);

    (status, json)
}

/// Helper to make a POST request with JSON body.
async fn post_json(router: &Router, path: &str, body: Value) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(path)
                .header("Content-Type", "application/json")
                .body(Body::from(serde_json::to_string(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);

    (status, json)
}

// ============================================================================
// Info Endpoint Tests
// ============================================================================

#[tokio::test]
async fn test_get_info_returns_node_info() {
    let (router, node) = create_test_api().await;

    let (status, json) = get_json(&router, "/info").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["name"], "test-node");
    assert_eq!(json["appVersion"], murmur_api::API_VERSION);
    assert_eq!(json["nodeId"], node.record().id.to_string());
    assert_eq!(json["address"], node.address());
    assert_eq!(json["peerCount"], 1);
    assert_eq!(json["connectionCount"], 0);

    node.stop().await.unwrap();
}

// ============================================================================
// Peers Endpoint Tests
// ============================================================================

#[tokio::test]
async fn test_get_peers_lists_self() {
    let (router, node) = create_test_api().await;

    let (status, json) = get_json(&router, "/peers").await;

    assert_eq!(status, StatusCode::OK);
    let peers = json["peers"].as_array().unwrap();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0]["id"], node.record().id.to_string());
    assert_eq!(peers[0]["address"], node.address());

    node.stop().await.unwrap();
}

#[tokio::test]
async fn test_get_online_peers_starts_with_self() {
    let (router, x) = create_test_api().await;
    let dy = TestDataDir::new();
    let y = TestNode::spawn(&dy, Some(&x.address())).await;
    wait_for_online(&x.handle, |peers| contains_address(peers, &y.address())).await;

    let (status, json) = get_json(&router, "/peers/online").await;

    assert_eq!(status, StatusCode::OK);
    let online = json["onlinePeers"].as_array().unwrap();
    assert_eq!(online.len(), 2);
    assert_eq!(online[0]["address"], x.address());
    assert_eq!(online[1]["address"], y.address());

    let (_, json) = get_json(&router, "/peers").await;
    assert_eq!(json["peers"].as_array().unwrap().len(), 2);

    y.stop().await.unwrap();
    x.stop().await.unwrap();
}

// ============================================================================
// Messages Endpoint Tests
// ============================================================================

#[tokio::test]
async fn test_send_message_outcomes() {
    let (router, node) = create_test_api().await;

    let (status, json) = post_json(
        &router,
        "/messages/send",
        json!({ "recipientAddress": node.address(), "message": "me" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, "SELF_SEND");

    let (status, json) = post_json(
        &router,
        "/messages/send",
        json!({ "recipientAddress": "127.0.0.1:1", "message": "hello" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, "NON_EXISTENT");

    node.stop().await.unwrap();
}

#[tokio::test]
async fn test_send_message_rejects_empty_recipient() {
    let (router, node) = create_test_api().await;

    let (status, json) = post_json(
        &router,
        "/messages/send",
        json!({ "recipientAddress": "  ", "message": "hello" }),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], 400);
    assert_eq!(json["reason"], "Bad Request");

    node.stop().await.unwrap();
}

#[tokio::test]
async fn test_send_message_rejects_malformed_body() {
    let (router, node) = create_test_api().await;

    let (status, _) = post_json(&router, "/messages/send", json!({ "message": "hello" })).await;
    assert!(status.is_client_error());

    node.stop().await.unwrap();
}

#[tokio::test]
async fn test_message_lists() {
    let (router, x) = create_test_api().await;
    let dy = TestDataDir::new();
    let mut y = TestNode::spawn(&dy, Some(&x.address())).await;
    wait_for_online(&x.handle, |peers| contains_address(peers, &y.address())).await;

    let (_, json) = get_json(&router, "/messages/sent").await;
    assert_eq!(json, json!({ "sentMessages": [] }));

    let (status, json) = post_json(
        &router,
        "/messages/send",
        json!({ "recipientAddress": y.address(), "message": "ping" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, "SUCCESS");

    let (_, json) = get_json(&router, "/messages/sent").await;
    assert_eq!(
        json,
        json!({ "sentMessages": [{ "recipient": y.address(), "message": "ping" }] })
    );

    // Reply from Y shows up in X's received list
    y.wait_for_event(|event| matches!(event, NetworkEvent::MessageReceived { .. }))
        .await;
    let outcome = y.handle.send_message(&x.address(), "pong").await.unwrap();
    assert_eq!(outcome.as_str(), "SUCCESS");

    let received = tokio::time::timeout(crate::harness::WAIT_TIMEOUT, async {
        loop {
            let (_, json) = get_json(&router, "/messages/received").await;
            if !json["receivedMessages"].as_array().unwrap().is_empty() {
                return json;
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(
        received,
        json!({ "receivedMessages": [{ "sender": y.address(), "message": "pong" }] })
    );

    y.stop().await.unwrap();
    x.stop().await.unwrap();
}

// ============================================================================
// Service Lifecycle Tests
// ============================================================================

#[tokio::test]
async fn test_stopped_service_returns_unavailable() {
    let (router, node) = create_test_api().await;
    node.stop().await.unwrap();

    for path in ["/info", "/peers", "/peers/online", "/messages/sent"] {
        let (status, json) = get_json(&router, path).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{}", path);
        assert_eq!(json["error"], 503);
    }
}
