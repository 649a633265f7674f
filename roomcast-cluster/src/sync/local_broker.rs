use std::sync::Arc;
use tracing::{debug, info, trace};

use roomcast_core::models::{ConnectionId, RoomId, UserId};

use super::connection::{Connection, EventReceiver};
use super::events::Event;
use super::group_index::GroupIndex;
use super::registry::ConnectionRegistry;
use crate::error::{Error, Result};

/// Observer of group lifecycle transitions.
///
/// Called exactly when a group gains its first local member and when it
/// loses its last one, while that group's entry is locked. Implementations
/// must return quickly and must not call back into the broker.
pub trait GroupListener: Send + Sync {
    fn group_created(&self, room_id: &RoomId);
    fn group_removed(&self, room_id: &RoomId);
}

/// Process-local fan-out: connection registry plus group index.
///
/// Lock order is connection membership, then group entry. `send` only takes
/// a group entry briefly to snapshot its members and never holds it while
/// enqueueing.
pub struct LocalBroker {
    registry: ConnectionRegistry,
    groups: GroupIndex,
    listener: Option<Arc<dyn GroupListener>>,
}

impl LocalBroker {
    /// Create a broker with no relay attached
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            groups: GroupIndex::new(),
            listener: None,
        }
    }

    /// Create a broker that reports group transitions to `listener`
    #[must_use]
    pub fn with_listener(listener: Arc<dyn GroupListener>) -> Self {
        Self {
            listener: Some(listener),
            ..Self::new()
        }
    }

    /// Register a new connection and hand back its queue reader
    pub fn connect(&self) -> (ConnectionId, EventReceiver) {
        self.register(None)
    }

    /// Register a new connection owned by `user_id`, so later membership
    /// changes of that user can reach it through [`connections_of`](Self::connections_of)
    pub fn connect_user(&self, user_id: UserId) -> (ConnectionId, EventReceiver) {
        self.register(Some(user_id))
    }

    fn register(&self, user_id: Option<UserId>) -> (ConnectionId, EventReceiver) {
        let (connection, receiver) = Connection::open(ConnectionId::generate(), user_id);
        let connection_id = connection.id().clone();
        let user = connection.user_id().map(ToString::to_string);
        self.registry.insert(connection);

        info!(
            connection_id = %connection_id,
            user_id = ?user,
            total_connections = self.registry.len(),
            "Connection registered"
        );

        (connection_id, receiver)
    }

    /// Remove a connection from every group and close its queue.
    ///
    /// Idempotent. Returns `true` only for the call that disconnected it.
    pub fn disconnect(&self, connection_id: &ConnectionId) -> bool {
        let Some(connection) = self.registry.remove(connection_id) else {
            debug!(connection_id = %connection_id, "Disconnect for unknown connection ignored");
            return false;
        };

        let groups = {
            let mut membership = connection.membership();
            membership.closed = true;
            std::mem::take(&mut membership.groups)
        };

        for room_id in &groups {
            self.groups
                .remove(room_id, connection_id, |room| self.notify_removed(room));
        }

        connection.close();

        info!(
            connection_id = %connection_id,
            groups = groups.len(),
            duration = ?connection.duration(),
            total_connections = self.registry.len(),
            "Connection disconnected"
        );

        true
    }

    /// Add a connection to a group, creating the group if needed.
    ///
    /// Returns `Ok(false)` if it was already a member.
    pub fn join(&self, connection_id: &ConnectionId, room_id: RoomId) -> Result<bool> {
        let connection = self
            .registry
            .get(connection_id)
            .ok_or_else(|| Error::NotConnected(connection_id.clone()))?;

        let mut membership = connection.membership();
        if membership.closed {
            return Err(Error::NotConnected(connection_id.clone()));
        }
        if !membership.groups.insert(room_id.clone()) {
            return Ok(false);
        }
        self.groups
            .insert(&room_id, &connection, |room| self.notify_created(room));
        drop(membership);

        debug!(
            connection_id = %connection_id,
            room_id = %room_id,
            members = self.groups.member_count(&room_id),
            "Connection joined group"
        );

        Ok(true)
    }

    /// Remove a connection from a group. Idempotent; unknown ids are ignored.
    pub fn leave(&self, connection_id: &ConnectionId, room_id: &RoomId) -> bool {
        let Some(connection) = self.registry.get(connection_id) else {
            return false;
        };

        let mut membership = connection.membership();
        if !membership.groups.remove(room_id) {
            return false;
        }
        self.groups
            .remove(room_id, connection_id, |room| self.notify_removed(room));
        drop(membership);

        debug!(connection_id = %connection_id, room_id = %room_id, "Connection left group");
        true
    }

    /// Fan `data` out to every local member of `room_id`.
    ///
    /// Never publishes anywhere else, so it is also the delivery path for
    /// events arriving from the relay. Closed recipients are skipped.
    /// Returns the number of queues the event was placed on.
    pub fn send(&self, room_id: &RoomId, data: impl Into<Arc<str>>) -> usize {
        let members = self.groups.members(room_id);
        if members.is_empty() {
            trace!(room_id = %room_id, "No local members, nothing to fan out");
            return 0;
        }

        let event = Event::for_group(room_id.clone(), data.into());
        let mut delivered = 0;
        for connection in &members {
            if connection.enqueue(event.clone()) {
                delivered += 1;
            } else {
                debug!(
                    room_id = %room_id,
                    connection_id = %connection.id(),
                    "Skipping closed connection during fan-out"
                );
            }
        }

        debug!(
            room_id = %room_id,
            members = members.len(),
            delivered = delivered,
            "Local fan-out complete"
        );

        delivered
    }

    /// Enqueue an event for one connection only
    pub fn send_to_connection(&self, connection_id: &ConnectionId, event: Event) -> Result<()> {
        let connection = self
            .registry
            .get(connection_id)
            .ok_or_else(|| Error::NotConnected(connection_id.clone()))?;

        if connection.enqueue(event) {
            Ok(())
        } else {
            Err(Error::NotConnected(connection_id.clone()))
        }
    }

    /// Disconnect every local connection. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let ids = self.registry.ids();
        let closed = ids.iter().filter(|id| self.disconnect(id)).count();
        info!(closed = closed, "Closed all local connections");
        closed
    }

    #[must_use]
    pub fn is_connected(&self, connection_id: &ConnectionId) -> bool {
        self.registry.contains(connection_id)
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Live connections of a user on this node
    #[must_use]
    pub fn connections_of(&self, user_id: &UserId) -> Vec<ConnectionId> {
        self.registry.connections_of(user_id)
    }

    #[must_use]
    pub fn user_count(&self) -> usize {
        self.registry.user_count()
    }

    /// Number of groups with at least one local member
    #[must_use]
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    #[must_use]
    pub fn contains_group(&self, room_id: &RoomId) -> bool {
        self.groups.contains(room_id)
    }

    #[must_use]
    pub fn member_count(&self, room_id: &RoomId) -> usize {
        self.groups.member_count(room_id)
    }

    #[must_use]
    pub fn members(&self, room_id: &RoomId) -> Vec<ConnectionId> {
        self.groups.member_ids(room_id)
    }

    /// Groups of a connection; empty for unknown ids
    #[must_use]
    pub fn groups_of(&self, connection_id: &ConnectionId) -> Vec<RoomId> {
        self.registry
            .get(connection_id)
            .map(|connection| connection.groups())
            .unwrap_or_default()
    }

    fn notify_created(&self, room_id: &RoomId) {
        debug!(room_id = %room_id, "First local member, group created");
        if let Some(listener) = &self.listener {
            listener.group_created(room_id);
        }
    }

    fn notify_removed(&self, room_id: &RoomId) {
        debug!(room_id = %room_id, "Last local member left, group removed");
        if let Some(listener) = &self.listener {
            listener.group_removed(room_id);
        }
    }
}

impl Default for LocalBroker {
    fn default() -> Self {
        Self::new()
    }
}
