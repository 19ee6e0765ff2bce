//! # murmur-api
//!
//! REST API for a murmur node.
//!
//! This crate provides HTTP endpoints over a running network service:
//! - `/info` - Node information
//! - `/peers` - Registered and online peers
//! - `/messages` - Sending and listing user messages

mod error;
mod handlers;
mod routes;
mod state;

pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;

use axum::Router;

/// Default API port.
pub const DEFAULT_API_PORT: u16 = 3000;

/// API version.
pub const API_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Create the API router with all routes.
pub fn build_api(state: AppState) -> Router {
    create_router(state)
}
