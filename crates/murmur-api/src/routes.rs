//! API route definitions.

use crate::{handlers, AppState};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Create the API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Info endpoints
        .route("/info", get(handlers::info::get_info))
        // Peer endpoints
        .route("/peers", get(handlers::peers::get_peers))
        .route("/peers/online", get(handlers::peers::get_online_peers))
        // Message endpoints
        .route("/messages/send", post(handlers::messages::send_message))
        .route("/messages/received", get(handlers::messages::get_received))
        .route("/messages/sent", get(handlers::messages::get_sent))
        // Apply middleware
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
