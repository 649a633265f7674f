use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;

use roomcast_core::models::{ConnectionId, UserId};

use super::connection::Connection;

/// Process-local map of live connections by id, plus the connections each
/// user currently holds.
///
/// Backed by sharded maps so lookups and removals for different ids do not
/// contend on one lock.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<Connection>>,
    user_connections: DashMap<UserId, HashSet<ConnectionId>>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, connection: Arc<Connection>) {
        if let Some(user_id) = connection.user_id() {
            self.user_connections
                .entry(user_id.clone())
                .or_default()
                .insert(connection.id().clone());
        }
        self.connections.insert(connection.id().clone(), connection);
    }

    #[must_use]
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections.get(id).map(|entry| entry.value().clone())
    }

    /// Remove a connection; only one caller ever receives it
    pub fn remove(&self, id: &ConnectionId) -> Option<Arc<Connection>> {
        let (_, connection) = self.connections.remove(id)?;

        if let Some(user_id) = connection.user_id() {
            if let Entry::Occupied(mut entry) = self.user_connections.entry(user_id.clone()) {
                entry.get_mut().remove(id);
                if entry.get().is_empty() {
                    entry.remove();
                }
            }
        }

        Some(connection)
    }

    #[must_use]
    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    #[must_use]
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Live connections opened on behalf of `user_id`
    #[must_use]
    pub fn connections_of(&self, user_id: &UserId) -> Vec<ConnectionId> {
        self.user_connections
            .get(user_id)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Users holding at least one live connection
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.user_connections.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
