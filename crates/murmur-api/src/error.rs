//! API error types.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use murmur_network::NetworkError;
use serde::Serialize;
use thiserror::Error;

/// API errors.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Bad request.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Network service error.
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: u16,
    reason: String,
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, reason) = match &self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "Bad Request"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error"),
            ApiError::Network(NetworkError::ServiceStopped) => {
                (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable")
            }
            ApiError::Network(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Network Error"),
        };

        let detail = match self {
            ApiError::BadRequest(msg) | ApiError::Internal(msg) => msg,
            ApiError::Network(e) => e.to_string(),
        };

        let body = ErrorResponse {
            error: status.as_u16(),
            reason: reason.to_string(),
            detail,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type for API operations.
pub type ApiResult<T> = Result<T, ApiError>;
