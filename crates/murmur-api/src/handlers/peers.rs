//! Peer handlers.

use crate::{ApiResult, AppState};
use axum::{extract::State, Json};
use murmur_network::PeerRecord;
use serde::Serialize;

/// Registered peers.
#[derive(Serialize)]
pub struct PeersResponse {
    pub peers: Vec<PeerRecord>,
}

/// Peers with an open connection, this node first.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OnlinePeersResponse {
    pub online_peers: Vec<PeerRecord>,
}

/// GET /peers
pub async fn get_peers(State(state): State<AppState>) -> ApiResult<Json<PeersResponse>> {
    let peers = state.network.list_peers().await?;
    Ok(Json(PeersResponse { peers }))
}

/// GET /peers/online
pub async fn get_online_peers(
    State(state): State<AppState>,
) -> ApiResult<Json<OnlinePeersResponse>> {
    let online_peers = state.network.list_online_peers().await?;
    Ok(Json(OnlinePeersResponse { online_peers }))
}
