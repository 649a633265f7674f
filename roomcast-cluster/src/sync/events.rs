use std::sync::Arc;

use roomcast_core::models::{ConnectionId, RoomId};

/// Name of the acknowledgment event written first on every stream
pub const CONNECTED_EVENT: &str = "connected";

/// Name of the keep-alive event
pub const PING_EVENT: &str = "ping";

/// One unit of outbound data for a single connection.
///
/// Group events are named after their group id. Direct events (no group)
/// carry their own name, e.g. [`CONNECTED_EVENT`]. The payload is shared
/// between every recipient of a fan-out and never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    group: Option<RoomId>,
    name: String,
    data: Arc<str>,
}

impl Event {
    /// Event fanned out to the members of `room_id`
    #[must_use]
    pub fn for_group(room_id: RoomId, data: Arc<str>) -> Self {
        Self {
            name: room_id.to_string(),
            group: Some(room_id),
            data,
        }
    }

    /// Event addressed to a single connection
    #[must_use]
    pub fn direct(name: impl Into<String>, data: impl Into<Arc<str>>) -> Self {
        Self {
            group: None,
            name: name.into(),
            data: data.into(),
        }
    }

    /// Acknowledgment identifying a freshly registered connection
    #[must_use]
    pub fn connected(connection_id: &ConnectionId) -> Self {
        Self::direct(CONNECTED_EVENT, format!("Connection: {connection_id}"))
    }

    #[must_use]
    pub const fn group_id(&self) -> Option<&RoomId> {
        self.group.as_ref()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn data(&self) -> &str {
        &self.data
    }

    /// Whether both events share the same payload allocation
    #[must_use]
    pub fn shares_payload_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}
