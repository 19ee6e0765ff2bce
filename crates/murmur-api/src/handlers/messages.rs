//! Message handlers.

use crate::{ApiError, ApiResult, AppState};
use axum::{extract::State, Json};
use murmur_network::SendOutcome;
use serde::{Deserialize, Serialize};

/// Send request.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    /// Recipient P2P address (host:port).
    pub recipient_address: String,
    /// Message body.
    pub message: String,
}

/// A received message.
#[derive(Serialize)]
pub struct ReceivedMessage {
    pub sender: String,
    pub message: String,
}

/// A sent message.
#[derive(Serialize)]
pub struct SentMessage {
    pub recipient: String,
    pub message: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedMessagesResponse {
    pub received_messages: Vec<ReceivedMessage>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SentMessagesResponse {
    pub sent_messages: Vec<SentMessage>,
}

/// POST /messages/send
///
/// Responds with the outcome: `SUCCESS`, `NOT_ONLINE`, `NON_EXISTENT` or
/// `SELF_SEND`.
pub async fn send_message(
    State(state): State<AppState>,
    Json(request): Json<SendMessageRequest>,
) -> ApiResult<Json<SendOutcome>> {
    if request.recipient_address.trim().is_empty() {
        return Err(ApiError::BadRequest("recipientAddress is empty".into()));
    }

    let outcome = state
        .network
        .send_message(&request.recipient_address, &request.message)
        .await?;
    Ok(Json(outcome))
}

/// GET /messages/received
pub async fn get_received(
    State(state): State<AppState>,
) -> ApiResult<Json<ReceivedMessagesResponse>> {
    let received_messages = state
        .network
        .received_messages()
        .await?
        .into_iter()
        .map(|entry| ReceivedMessage {
            sender: entry.counterpart,
            message: entry.body,
        })
        .collect();

    Ok(Json(ReceivedMessagesResponse { received_messages }))
}

/// GET /messages/sent
pub async fn get_sent(State(state): State<AppState>) -> ApiResult<Json<SentMessagesResponse>> {
    let sent_messages = state
        .network
        .sent_messages()
        .await?
        .into_iter()
        .map(|entry| SentMessage {
            recipient: entry.counterpart,
            message: entry.body,
        })
        .collect();

    Ok(Json(SentMessagesResponse { sent_messages }))
}
