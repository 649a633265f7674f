//! Room management endpoints
//!
//! Membership lives in the room directory; the caller's open event streams
//! on this node are joined to or removed from the room group right after
//! the directory changes, so they start or stop receiving without a
//! reconnect.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    Json,
};
use serde::Serialize;
use tracing::{debug, info};

use roomcast_cluster::Error as ClusterError;
use roomcast_core::models::{ChatRoom, CreateRoomRequest, RoomId, UserId};

use super::{middleware::AuthUser, AppError, AppResult, AppState};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipResponse {
    pub success: bool,
    pub message: String,
    pub room_id: RoomId,
    /// Open event streams of the caller that were updated
    pub connections: usize,
}

/// Rooms the caller belongs to
pub async fn list_rooms(
    auth: AuthUser,
    State(state): State<AppState>,
) -> AppResult<Json<Vec<ChatRoom>>> {
    let rooms = state.rooms.list_rooms(&auth.user_id).await?;
    Ok(Json(rooms))
}

/// Create a room with the caller as its first member
pub async fn create_room(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(req): Json<CreateRoomRequest>,
) -> AppResult<(StatusCode, [(header::HeaderName, String); 1], Json<ChatRoom>)> {
    if req.name.trim().is_empty() {
        return Err(AppError::bad_request("Room name cannot be empty"));
    }

    let room = state.rooms.create_room(&auth.user_id, req).await?;
    let connections = attach_streams(&state, &auth.user_id, &room.id)?;

    info!(
        user_id = %auth.user_id,
        room_id = %room.id,
        connections = connections,
        "Room created"
    );

    let location = format!("/api/rooms/{}/messages", room.id);
    Ok((StatusCode::CREATED, [(header::LOCATION, location)], Json(room)))
}

/// Join a room and start delivering it to the caller's open streams
pub async fn join_room(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> AppResult<Json<MembershipResponse>> {
    let room_id = RoomId::from(room_id);

    if !state.rooms.join_room(&room_id, &auth.user_id).await? {
        return Err(AppError::bad_request("You are already a member of this room"));
    }

    let connections = attach_streams(&state, &auth.user_id, &room_id)?;

    info!(
        user_id = %auth.user_id,
        room_id = %room_id,
        connections = connections,
        "User joined room"
    );

    Ok(Json(MembershipResponse {
        success: true,
        message: "Joined room successfully".to_string(),
        room_id,
        connections,
    }))
}

/// Leave a room and stop delivering it to the caller's open streams
pub async fn leave_room(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> AppResult<Json<MembershipResponse>> {
    let room_id = RoomId::from(room_id);

    if !state.rooms.leave_room(&room_id, &auth.user_id).await? {
        return Err(AppError::bad_request("You are not a member of this room"));
    }

    let connections = state
        .broker
        .connections_of(&auth.user_id)
        .iter()
        .filter(|connection_id| state.broker.leave(connection_id, &room_id))
        .count();

    info!(
        user_id = %auth.user_id,
        room_id = %room_id,
        connections = connections,
        "User left room"
    );

    Ok(Json(MembershipResponse {
        success: true,
        message: "Left room successfully".to_string(),
        room_id,
        connections,
    }))
}

/// Join every open stream of `user_id` to the room group.
///
/// A stream closing concurrently is skipped; it has nothing left to deliver.
fn attach_streams(state: &AppState, user_id: &UserId, room_id: &RoomId) -> AppResult<usize> {
    let mut joined = 0;
    for connection_id in state.broker.connections_of(user_id) {
        match state.broker.join(&connection_id, room_id.clone()) {
            Ok(true) => joined += 1,
            Ok(false) => {}
            Err(ClusterError::NotConnected(_)) => {
                debug!(
                    connection_id = %connection_id,
                    room_id = %room_id,
                    "Stream closed before it could join the room"
                );
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(joined)
}
