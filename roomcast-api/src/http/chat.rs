//! Room message endpoints
//!
//! Sends fan out through the broker first; persistence runs afterwards in a
//! detached task and never delays delivery.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use roomcast_core::models::{ChatMessage, RoomId, SendMessageRequest};

use super::{middleware::AuthUser, AppError, AppResult, AppState};

const DEFAULT_HISTORY_LIMIT: usize = 50;
const MAX_HISTORY_LIMIT: usize = 200;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub message: ChatMessage,
    /// Local connections the message was queued for
    pub delivered: usize,
    /// Whether the message was handed to the cross-node relay
    pub relayed: bool,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Newest messages to pass over before the page starts
    pub skip: Option<usize>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionCountResponse {
    pub room_id: RoomId,
    pub connections: usize,
}

/// Send a message to every member of a room
pub async fn send_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(req): Json<SendMessageRequest>,
) -> AppResult<(StatusCode, Json<SendMessageResponse>)> {
    if req.content.trim().is_empty() {
        return Err(AppError::bad_request("Message content cannot be empty"));
    }

    if !state.rooms.is_member(&req.room_id, &auth.user_id).await? {
        return Err(AppError::forbidden("You are not a member of this room"));
    }

    let message = ChatMessage::new(req.room_id, auth.user_id, req.content);
    let payload = serde_json::to_string(&message).map_err(|e| {
        error!(error = %e, "Failed to serialize chat message");
        AppError::internal("Data processing error")
    })?;

    let outcome = state.broker.send(&message.room_id, payload);

    let store = state.messages.clone();
    let persisted = message.clone();
    tokio::spawn(async move {
        let message_id = persisted.id.clone();
        if let Err(e) = store.save(persisted).await {
            error!(message_id = %message_id, error = %e, "Failed to persist chat message");
        }
    });

    debug!(
        room_id = %message.room_id,
        message_id = %message.id,
        delivered = outcome.local_recipients,
        "Chat message sent"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(SendMessageResponse {
            message,
            delivered: outcome.local_recipients,
            relayed: outcome.relayed,
        }),
    ))
}

/// One page of a room's history, oldest first; `skip` pages back from the
/// newest message
pub async fn get_messages(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(room_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<Vec<ChatMessage>>> {
    let room_id = RoomId::from(room_id);

    if !state.rooms.is_member(&room_id, &auth.user_id).await? {
        return Err(AppError::forbidden("You are not a member of this room"));
    }

    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    let skip = query.skip.unwrap_or(0);
    let messages = state.messages.recent(&room_id, skip, limit).await?;

    Ok(Json(messages))
}

/// Connections joined to a room on this node
pub async fn get_connection_count(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(room_id): Path<String>,
) -> Json<ConnectionCountResponse> {
    let room_id = RoomId::from(room_id);
    let connections = state.broker.local().member_count(&room_id);

    Json(ConnectionCountResponse {
        room_id,
        connections,
    })
}
