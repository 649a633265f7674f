use parking_lot::RwLock;

use crate::models::{ChatMessage, RoomId};
use crate::Result;

/// Persistence hand-off for sent messages.
///
/// Callers invoke this after fan-out; delivery never waits on it.
#[async_trait::async_trait]
pub trait MessageStore: Send + Sync {
    async fn save(&self, message: ChatMessage) -> Result<()>;

    /// One page of a room's history, oldest first.
    ///
    /// Pages count back from the newest message: `skip` newest messages are
    /// passed over, then up to `limit` older ones are returned.
    async fn recent(&self, room_id: &RoomId, skip: usize, limit: usize)
        -> Result<Vec<ChatMessage>>;
}

/// Keeps messages in memory, oldest first
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    messages: RwLock<Vec<ChatMessage>>,
}

impl InMemoryMessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `limit` messages of a room after passing over the `skip` newest,
    /// oldest first
    #[must_use]
    pub fn latest(&self, room_id: &RoomId, skip: usize, limit: usize) -> Vec<ChatMessage> {
        let messages = self.messages.read();
        let mut latest: Vec<ChatMessage> = messages
            .iter()
            .rev()
            .filter(|m| &m.room_id == room_id)
            .skip(skip)
            .take(limit)
            .cloned()
            .collect();
        latest.reverse();
        latest
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }
}

#[async_trait::async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn save(&self, message: ChatMessage) -> Result<()> {
        self.messages.write().push(message);
        Ok(())
    }

    async fn recent(
        &self,
        room_id: &RoomId,
        skip: usize,
        limit: usize,
    ) -> Result<Vec<ChatMessage>> {
        Ok(self.latest(room_id, skip, limit))
    }
}
