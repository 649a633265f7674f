use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;

use roomcast_core::models::{ConnectionId, RoomId};

use super::connection::Connection;

type Members = HashMap<ConnectionId, Arc<Connection>>;

/// Process-local map from group id to its local members.
///
/// A group exists exactly while it has at least one member: the entry is
/// created by the first insert and removed in the same locked step that
/// removes the last member.
#[derive(Debug, Default)]
pub struct GroupIndex {
    groups: DashMap<RoomId, Members>,
}

impl GroupIndex {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `connection` to `room_id`.
    ///
    /// `on_create` runs while the new entry is still locked, so it must not
    /// touch this index. Returns `false` if it was already a member.
    pub fn insert(
        &self,
        room_id: &RoomId,
        connection: &Arc<Connection>,
        on_create: impl FnOnce(&RoomId),
    ) -> bool {
        match self.groups.entry(room_id.clone()) {
            Entry::Occupied(mut entry) => entry
                .get_mut()
                .insert(connection.id().clone(), connection.clone())
                .is_none(),
            Entry::Vacant(entry) => {
                on_create(entry.key());
                let mut members = Members::new();
                members.insert(connection.id().clone(), connection.clone());
                entry.insert(members);
                true
            }
        }
    }

    /// Remove `connection_id` from `room_id`, dropping the group when it
    /// empties.
    ///
    /// `on_remove` runs while the emptied entry is still locked. Returns
    /// `false` if it was not a member.
    pub fn remove(
        &self,
        room_id: &RoomId,
        connection_id: &ConnectionId,
        on_remove: impl FnOnce(&RoomId),
    ) -> bool {
        let Entry::Occupied(mut entry) = self.groups.entry(room_id.clone()) else {
            return false;
        };

        let removed = entry.get_mut().remove(connection_id).is_some();
        if entry.get().is_empty() {
            on_remove(entry.key());
            entry.remove();
        }
        removed
    }

    /// Snapshot of the current members of a group
    #[must_use]
    pub fn members(&self, room_id: &RoomId) -> Vec<Arc<Connection>> {
        self.groups
            .get(room_id)
            .map(|members| members.values().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn member_ids(&self, room_id: &RoomId) -> Vec<ConnectionId> {
        self.groups
            .get(room_id)
            .map(|members| members.keys().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn member_count(&self, room_id: &RoomId) -> usize {
        self.groups.get(room_id).map_or(0, |members| members.len())
    }

    #[must_use]
    pub fn contains(&self, room_id: &RoomId) -> bool {
        self.groups.contains_key(room_id)
    }

    #[must_use]
    pub fn room_ids(&self) -> Vec<RoomId> {
        self.groups.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of groups with at least one local member
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
