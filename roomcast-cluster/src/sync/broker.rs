//! Backplane facade
//!
//! Combines local fan-out with the optional Redis relay:
//! - Connection lifecycle and group membership (local)
//! - Room sends delivered locally, then published for other nodes
//! - Stats and graceful shutdown

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use roomcast_core::models::{ConnectionId, RoomId, UserId};

use super::connection::EventReceiver;
use super::events::Event;
use super::local_broker::LocalBroker;
use super::relay::{RedisRelay, RelayConfig, RelayStatus, RelaySubscriptions};
use crate::error::Result;

/// Build a node id from the hostname plus a random suffix
#[must_use]
pub fn generate_node_id() -> String {
    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    format!("{}_{}", hostname, nanoid::nanoid!(6))
}

/// Broker configuration
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Unique identifier for this node
    pub node_id: String,
    /// Redis connection URL; empty runs in single-node mode
    pub redis_url: String,
    pub topic_prefix: String,
    pub publish_channel_capacity: usize,
    pub connect_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            node_id: generate_node_id(),
            redis_url: String::new(),
            topic_prefix: "roomcast:room:".to_string(),
            publish_channel_capacity: 10_000,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl BrokerConfig {
    #[must_use]
    pub fn from_config(config: &roomcast_core::Config) -> Self {
        Self {
            node_id: config
                .cluster
                .node_id
                .clone()
                .unwrap_or_else(generate_node_id),
            redis_url: config.redis.url.clone(),
            topic_prefix: config.redis.topic_prefix.clone(),
            publish_channel_capacity: config.cluster.publish_channel_capacity,
            connect_timeout: Duration::from_secs(config.redis.connect_timeout_seconds),
        }
    }
}

/// Result of sending to a room
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SendOutcome {
    /// Number of local connections the event was queued for
    pub local_recipients: usize,
    /// Whether the event was handed to the relay publisher
    pub relayed: bool,
}

/// Backplane stats
#[derive(Debug, Clone, Serialize)]
pub struct BrokerStats {
    pub node_id: String,
    pub connections: usize,
    /// Users holding at least one local connection
    pub users: usize,
    pub groups: usize,
    pub relay_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay: Option<RelayStatus>,
}

/// Entry point for the message backplane.
///
/// Every operation is non-blocking; delivery to clients happens through each
/// connection's [`EventReceiver`].
pub struct Broker {
    local: Arc<LocalBroker>,
    relay: Option<Arc<RedisRelay>>,
    node_id: String,
}

impl Broker {
    /// Create a broker, starting the Redis relay when a URL is configured.
    ///
    /// Must be called inside a Tokio runtime when the relay is enabled.
    pub fn new(config: BrokerConfig) -> Result<Self> {
        if config.redis_url.is_empty() {
            warn!("Redis URL not provided, running in single-node mode");
            return Ok(Self::single_node(config.node_id));
        }

        let (subscriptions, commands) = RelaySubscriptions::channel();
        let local = Arc::new(LocalBroker::with_listener(Arc::new(subscriptions)));

        let relay = Arc::new(RedisRelay::new(
            RelayConfig {
                redis_url: config.redis_url,
                topic_prefix: config.topic_prefix,
                node_id: config.node_id.clone(),
                publish_channel_capacity: config.publish_channel_capacity,
                connect_timeout: config.connect_timeout,
            },
            local.clone(),
        )?);
        relay.start(commands)?;

        info!(node_id = %config.node_id, "Broker started with Redis relay");

        Ok(Self {
            local,
            relay: Some(relay),
            node_id: config.node_id,
        })
    }

    /// Broker without a relay; sends reach local connections only
    #[must_use]
    pub fn single_node(node_id: impl Into<String>) -> Self {
        Self {
            local: Arc::new(LocalBroker::new()),
            relay: None,
            node_id: node_id.into(),
        }
    }

    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    #[must_use]
    pub const fn local(&self) -> &Arc<LocalBroker> {
        &self.local
    }

    #[must_use]
    pub fn relay_enabled(&self) -> bool {
        self.relay.is_some()
    }

    pub fn connect(&self) -> (ConnectionId, EventReceiver) {
        self.local.connect()
    }

    pub fn connect_user(&self, user_id: UserId) -> (ConnectionId, EventReceiver) {
        self.local.connect_user(user_id)
    }

    /// Local connections of a user; other nodes track their own
    #[must_use]
    pub fn connections_of(&self, user_id: &UserId) -> Vec<ConnectionId> {
        self.local.connections_of(user_id)
    }

    pub fn disconnect(&self, connection_id: &ConnectionId) -> bool {
        self.local.disconnect(connection_id)
    }

    pub fn join(&self, connection_id: &ConnectionId, room_id: RoomId) -> Result<bool> {
        self.local.join(connection_id, room_id)
    }

    pub fn leave(&self, connection_id: &ConnectionId, room_id: &RoomId) -> bool {
        self.local.leave(connection_id, room_id)
    }

    /// Send to every member of a room on every node.
    ///
    /// Local members are reached before this returns. A relay that cannot
    /// take the event is logged and reported through `relayed: false`.
    pub fn send(&self, room_id: &RoomId, data: impl Into<Arc<str>>) -> SendOutcome {
        let data = data.into();
        let local_recipients = self.local.send(room_id, Arc::clone(&data));

        let relayed = match &self.relay {
            Some(relay) => match relay.publish(room_id, &data) {
                Ok(()) => true,
                Err(e) => {
                    warn!(
                        room_id = %room_id,
                        error = %e,
                        "Event not relayed, remote members will miss it"
                    );
                    false
                }
            },
            None => false,
        };

        debug!(
            room_id = %room_id,
            local_recipients = local_recipients,
            relayed = relayed,
            "Room send complete"
        );

        SendOutcome {
            local_recipients,
            relayed,
        }
    }

    /// Enqueue an event for a single local connection
    pub fn send_to_connection(&self, connection_id: &ConnectionId, event: Event) -> Result<()> {
        self.local.send_to_connection(connection_id, event)
    }

    #[must_use]
    pub fn is_member(&self, connection_id: &ConnectionId, room_id: &RoomId) -> bool {
        self.local.groups_of(connection_id).contains(room_id)
    }

    #[must_use]
    pub fn stats(&self) -> BrokerStats {
        BrokerStats {
            node_id: self.node_id.clone(),
            connections: self.local.connection_count(),
            users: self.local.user_count(),
            groups: self.local.group_count(),
            relay_enabled: self.relay.is_some(),
            relay: self.relay.as_ref().map(|relay| relay.status()),
        }
    }

    /// Stop the relay and close every local connection
    pub fn shutdown(&self) {
        info!(node_id = %self.node_id, "Shutting down broker");
        if let Some(relay) = &self.relay {
            relay.shutdown();
        }
        self.local.close_all();
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        // The relay tasks hold their own handle to it
        if let Some(relay) = &self.relay {
            relay.shutdown();
        }
    }
}
