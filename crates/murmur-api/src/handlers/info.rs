//! Node info handler.

use crate::{ApiResult, AppState, API_VERSION};
use axum::{extract::State, Json};
use serde::Serialize;

/// Node info response.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeInfo {
    /// Node name.
    pub name: String,
    /// App version.
    pub app_version: String,
    /// Node id.
    pub node_id: String,
    /// Announced P2P address.
    pub address: String,
    /// Registered peers, self included.
    pub peer_count: usize,
    /// Open peer connections.
    pub connection_count: usize,
}

/// GET /info
pub async fn get_info(State(state): State<AppState>) -> ApiResult<Json<NodeInfo>> {
    let identity = state.network.identity();
    let peer_count = state.network.list_peers().await?.len();
    let connection_count = state.network.connection_count().await?;

    Ok(Json(NodeInfo {
        name: state.node_name.clone(),
        app_version: API_VERSION.to_string(),
        node_id: identity.id.to_string(),
        address: identity.address.clone(),
        peer_count,
        connection_count,
    }))
}
