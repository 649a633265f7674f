use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::HashSet;

use crate::config::RoomSeed;
use crate::models::{generate_id, ChatRoom, CreateRoomRequest, RoomId, UserId};
use crate::{Error, Result};

/// Room membership, the authorization gate in front of Join and Send
#[async_trait::async_trait]
pub trait RoomDirectory: Send + Sync {
    /// Whether `user_id` belongs to `room_id`
    async fn is_member(&self, room_id: &RoomId, user_id: &UserId) -> Result<bool>;

    /// Every room `user_id` belongs to, used to pick groups for a new stream
    async fn rooms_for_user(&self, user_id: &UserId) -> Result<Vec<RoomId>>;

    /// Summaries of the rooms `user_id` belongs to
    async fn list_rooms(&self, user_id: &UserId) -> Result<Vec<ChatRoom>>;

    /// Create a room with `owner` as its first member
    async fn create_room(&self, owner: &UserId, request: CreateRoomRequest) -> Result<ChatRoom>;

    /// Add a member. `Ok(false)` if already a member, `NotFound` for an
    /// unknown room.
    async fn join_room(&self, room_id: &RoomId, user_id: &UserId) -> Result<bool>;

    /// Remove a member. `Ok(false)` if not a member.
    async fn leave_room(&self, room_id: &RoomId, user_id: &UserId) -> Result<bool>;
}

#[derive(Debug)]
struct RoomEntry {
    name: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
    members: HashSet<UserId>,
}

impl RoomEntry {
    fn new(name: String, description: Option<String>) -> Self {
        Self {
            name,
            description,
            created_at: Utc::now(),
            members: HashSet::new(),
        }
    }

    fn summary(&self, id: &RoomId) -> ChatRoom {
        ChatRoom {
            id: id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            created_at: self.created_at,
            member_count: self.members.len(),
        }
    }
}

/// Process-local room directory
#[derive(Debug, Default)]
pub struct InMemoryRoomDirectory {
    rooms: DashMap<RoomId, RoomEntry>,
}

impl InMemoryRoomDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a directory from configured room seeds; a seeded room is named
    /// after its id
    #[must_use]
    pub fn from_seeds(seeds: &[RoomSeed]) -> Self {
        let directory = Self::new();
        for seed in seeds {
            let mut entry = directory
                .rooms
                .entry(RoomId::from(seed.id.as_str()))
                .or_insert_with(|| RoomEntry::new(seed.id.clone(), None));
            entry
                .members
                .extend(seed.members.iter().map(|m| UserId::from(m.as_str())));
        }
        directory
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

#[async_trait::async_trait]
impl RoomDirectory for InMemoryRoomDirectory {
    async fn is_member(&self, room_id: &RoomId, user_id: &UserId) -> Result<bool> {
        Ok(self
            .rooms
            .get(room_id)
            .is_some_and(|room| room.members.contains(user_id)))
    }

    async fn rooms_for_user(&self, user_id: &UserId) -> Result<Vec<RoomId>> {
        let mut rooms: Vec<RoomId> = self
            .rooms
            .iter()
            .filter(|entry| entry.value().members.contains(user_id))
            .map(|entry| entry.key().clone())
            .collect();
        rooms.sort();
        Ok(rooms)
    }

    async fn list_rooms(&self, user_id: &UserId) -> Result<Vec<ChatRoom>> {
        let mut rooms: Vec<ChatRoom> = self
            .rooms
            .iter()
            .filter(|entry| entry.value().members.contains(user_id))
            .map(|entry| entry.value().summary(entry.key()))
            .collect();
        rooms.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(rooms)
    }

    async fn create_room(&self, owner: &UserId, request: CreateRoomRequest) -> Result<ChatRoom> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("Room name cannot be empty".to_string()));
        }

        let room_id = RoomId::from(generate_id());
        let mut entry = RoomEntry::new(name.to_string(), request.description);
        entry.members.insert(owner.clone());
        let summary = entry.summary(&room_id);
        self.rooms.insert(room_id, entry);

        Ok(summary)
    }

    async fn join_room(&self, room_id: &RoomId, user_id: &UserId) -> Result<bool> {
        let mut room = self
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| Error::NotFound(format!("Room {room_id} not found")))?;
        Ok(room.members.insert(user_id.clone()))
    }

    async fn leave_room(&self, room_id: &RoomId, user_id: &UserId) -> Result<bool> {
        Ok(self
            .rooms
            .get_mut(room_id)
            .is_some_and(|mut room| room.members.remove(user_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_request(name: &str) -> CreateRoomRequest {
        CreateRoomRequest {
            name: name.to_string(),
            description: None,
        }
    }

    #[tokio::test]
    async fn test_membership_lookup() {
        let directory = InMemoryRoomDirectory::from_seeds(&[RoomSeed {
            id: "room1".to_string(),
            members: vec![],
        }]);
        let alice = UserId::from("alice");
        let room = RoomId::from("room1");

        assert!(!directory.is_member(&room, &alice).await.unwrap());
        assert!(directory.join_room(&room, &alice).await.unwrap());
        assert!(!directory.join_room(&room, &alice).await.unwrap());
        assert!(directory.is_member(&room, &alice).await.unwrap());

        assert!(directory.leave_room(&room, &alice).await.unwrap());
        assert!(!directory.is_member(&room, &alice).await.unwrap());
        assert!(!directory.leave_room(&room, &alice).await.unwrap());
    }

    #[tokio::test]
    async fn test_join_unknown_room_is_not_found() {
        let directory = InMemoryRoomDirectory::new();
        let err = directory
            .join_room(&RoomId::from("ghost"), &UserId::from("alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(directory.room_count(), 0);

        assert!(!directory
            .leave_room(&RoomId::from("ghost"), &UserId::from("alice"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_create_room_adds_owner() {
        let directory = InMemoryRoomDirectory::new();
        let alice = UserId::from("alice");

        let room = directory
            .create_room(
                &alice,
                CreateRoomRequest {
                    name: "  General  ".to_string(),
                    description: Some("Everyone".to_string()),
                },
            )
            .await
            .unwrap();

        assert_eq!(room.name, "General");
        assert_eq!(room.description.as_deref(), Some("Everyone"));
        assert_eq!(room.member_count, 1);
        assert!(directory.is_member(&room.id, &alice).await.unwrap());

        let other = directory
            .create_room(&alice, create_request("General"))
            .await
            .unwrap();
        assert_ne!(room.id, other.id);
        assert_eq!(directory.list_rooms(&alice).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_create_room_rejects_blank_name() {
        let directory = InMemoryRoomDirectory::new();
        let err = directory
            .create_room(&UserId::from("alice"), create_request("   "))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert_eq!(directory.room_count(), 0);
    }

    #[tokio::test]
    async fn test_rooms_for_user_from_seeds() {
        let directory = InMemoryRoomDirectory::from_seeds(&[
            RoomSeed {
                id: "b-room".to_string(),
                members: vec!["alice".to_string()],
            },
            RoomSeed {
                id: "a-room".to_string(),
                members: vec!["alice".to_string(), "bob".to_string()],
            },
            RoomSeed {
                id: "empty".to_string(),
                members: vec![],
            },
        ]);

        assert_eq!(directory.room_count(), 3);
        let rooms = directory.rooms_for_user(&UserId::from("alice")).await.unwrap();
        assert_eq!(rooms, vec![RoomId::from("a-room"), RoomId::from("b-room")]);

        let listed = directory.list_rooms(&UserId::from("bob")).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "a-room");
        assert_eq!(listed[0].member_count, 2);

        let rooms = directory.rooms_for_user(&UserId::from("carol")).await.unwrap();
        assert!(rooms.is_empty());
    }
}
