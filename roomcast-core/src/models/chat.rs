use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{generate_id, RoomId, UserId};

/// A chat message as fanned out to room members and handed to persistence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String, // nanoid(12)
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    #[must_use]
    pub fn new(room_id: RoomId, sender_id: UserId, content: String) -> Self {
        Self {
            id: generate_id(),
            room_id,
            sender_id,
            content,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub room_id: RoomId,
    pub content: String,
}

/// Room summary returned by the room endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoom {
    pub id: RoomId,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub member_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRoomRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}
