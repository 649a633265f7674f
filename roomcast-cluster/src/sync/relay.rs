use anyhow::Context;
use futures::StreamExt;
use parking_lot::Mutex;
use redis::aio::{MultiplexedConnection, PubSubSink};
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use roomcast_core::models::RoomId;

use super::local_broker::{GroupListener, LocalBroker};
use crate::error::{Error, Result};

/// Initial backoff delay for reconnection
const INITIAL_BACKOFF_SECS: u64 = 1;

/// Maximum backoff delay for reconnection
const MAX_BACKOFF_SECS: u64 = 30;

/// Relay topic for a room: `{prefix}{room_id}`
#[must_use]
pub fn topic_name(prefix: &str, room_id: &RoomId) -> String {
    format!("{prefix}{room_id}")
}

/// Inverse of [`topic_name`]
#[must_use]
pub fn room_from_topic(prefix: &str, topic: &str) -> Option<RoomId> {
    topic
        .strip_prefix(prefix)
        .filter(|id| !id.is_empty())
        .map(RoomId::from)
}

/// Message published on a room topic.
///
/// `node_id` identifies the publishing process; a node drops envelopes
/// carrying its own id because it already delivered them locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayEnvelope {
    pub node_id: String,
    pub room_id: RoomId,
    pub data: String,
}

impl RelayEnvelope {
    /// JSON wire form published on the room topic
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }
}

#[derive(Debug)]
enum SubscriptionCommand {
    Subscribe(RoomId),
    Unsubscribe(RoomId),
}

/// Group listener that turns first-member / last-member transitions into
/// ordered subscribe / unsubscribe commands for the relay subscriber.
#[derive(Debug)]
pub struct RelaySubscriptions {
    tx: mpsc::UnboundedSender<SubscriptionCommand>,
}

/// Receiving end of [`RelaySubscriptions`], consumed by [`RedisRelay::start`]
#[derive(Debug)]
pub struct SubscriptionCommands(mpsc::UnboundedReceiver<SubscriptionCommand>);

impl RelaySubscriptions {
    #[must_use]
    pub fn channel() -> (Self, SubscriptionCommands) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, SubscriptionCommands(rx))
    }

    fn forward(&self, command: SubscriptionCommand) {
        if let Err(e) = self.tx.send(command) {
            debug!(command = ?e.0, "Relay subscriber stopped, dropping subscription change");
        }
    }
}

impl GroupListener for RelaySubscriptions {
    fn group_created(&self, room_id: &RoomId) {
        self.forward(SubscriptionCommand::Subscribe(room_id.clone()));
    }

    fn group_removed(&self, room_id: &RoomId) {
        self.forward(SubscriptionCommand::Unsubscribe(room_id.clone()));
    }
}

/// Relay configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub redis_url: String,
    pub topic_prefix: String,
    pub node_id: String,
    pub publish_channel_capacity: usize,
    /// Timeout for connecting and for single Redis operations
    pub connect_timeout: Duration,
}

/// Point-in-time relay health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RelayStatus {
    pub connected: bool,
    pub topics: usize,
}

#[derive(Debug, Default)]
struct RelayState {
    connected: AtomicBool,
    topics: AtomicUsize,
}

/// Redis Pub/Sub bridge between nodes sharing rooms.
///
/// - Subscribes to `{prefix}{room_id}` only while this node has a local
///   member of the room (driven by [`RelaySubscriptions`])
/// - Publishes local sends to the room topic from a background task
/// - Forwards envelopes from other nodes to [`LocalBroker::send`], which
///   only reaches local members and never publishes again
///
/// Losing Redis degrades to local-only delivery; both tasks reconnect with
/// exponential backoff and the subscriber restores every active topic.
pub struct RedisRelay {
    client: redis::Client,
    config: RelayConfig,
    local: Arc<LocalBroker>,
    publish_tx: mpsc::Sender<RelayEnvelope>,
    publish_rx: Mutex<Option<mpsc::Receiver<RelayEnvelope>>>,
    state: Arc<RelayState>,
    cancel_token: CancellationToken,
}

impl RedisRelay {
    /// Create a relay. No connection is made until [`start`](Self::start).
    pub fn new(config: RelayConfig, local: Arc<LocalBroker>) -> Result<Self> {
        let client = redis::Client::open(config.redis_url.as_str())
            .map_err(|e| Error::Configuration(format!("Invalid Redis URL: {e}")))?;
        let (publish_tx, publish_rx) = mpsc::channel(config.publish_channel_capacity.max(1));

        Ok(Self {
            client,
            config,
            local,
            publish_tx,
            publish_rx: Mutex::new(Some(publish_rx)),
            state: Arc::new(RelayState::default()),
            cancel_token: CancellationToken::new(),
        })
    }

    /// Spawn the publisher and subscriber tasks
    pub fn start(self: &Arc<Self>, commands: SubscriptionCommands) -> Result<()> {
        let publish_rx = self
            .publish_rx
            .lock()
            .take()
            .ok_or_else(|| Error::Configuration("Relay already started".to_string()))?;

        tokio::spawn(Self::run_publisher(
            self.client.clone(),
            self.config.clone(),
            publish_rx,
            self.cancel_token.clone(),
        ));

        let relay = Arc::clone(self);
        tokio::spawn(async move { relay.run_subscriber(commands.0).await });

        info!(
            node_id = %self.config.node_id,
            topic_prefix = %self.config.topic_prefix,
            "Redis relay started"
        );
        Ok(())
    }

    /// Queue `data` for publication to the room topic.
    ///
    /// Never waits: a full or closed queue is reported as
    /// [`Error::RelayUnavailable`] and the event is not relayed.
    pub fn publish(&self, room_id: &RoomId, data: &str) -> Result<()> {
        let envelope = RelayEnvelope {
            node_id: self.config.node_id.clone(),
            room_id: room_id.clone(),
            data: data.to_string(),
        };

        self.publish_tx.try_send(envelope).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::RelayUnavailable(format!(
                "publish queue full (capacity {})",
                self.config.publish_channel_capacity
            )),
            mpsc::error::TrySendError::Closed(_) => {
                Error::RelayUnavailable("publisher task stopped".to_string())
            }
        })
    }

    #[must_use]
    pub fn status(&self) -> RelayStatus {
        RelayStatus {
            connected: self.state.connected.load(Ordering::Relaxed),
            topics: self.state.topics.load(Ordering::Relaxed),
        }
    }

    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    /// Stop both background tasks
    pub fn shutdown(&self) {
        if !self.cancel_token.is_cancelled() {
            info!(node_id = %self.config.node_id, "Shutting down Redis relay");
            self.cancel_token.cancel();
        }
    }

    fn topic(&self, room_id: &RoomId) -> String {
        topic_name(&self.config.topic_prefix, room_id)
    }

    /// Deliver one relay message to local members.
    ///
    /// Returns the number of local queues reached; envelopes from this node,
    /// malformed payloads and foreign topics reach none.
    pub fn dispatch(&self, topic: &str, payload: &str) -> usize {
        let envelope = match RelayEnvelope::decode(payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(error = %e, topic = %topic, "Failed to deserialize relay envelope");
                return 0;
            }
        };

        if envelope.node_id == self.config.node_id {
            debug!(topic = %topic, "Ignoring relay event from self");
            return 0;
        }

        let Some(room_id) = room_from_topic(&self.config.topic_prefix, topic) else {
            warn!(topic = %topic, "Invalid relay topic");
            return 0;
        };

        let delivered = self.local.send(&room_id, envelope.data);
        debug!(
            room_id = %room_id,
            origin = %envelope.node_id,
            local_subscribers = delivered,
            "Forwarded relay event to local members"
        );
        delivered
    }

    async fn run_publisher(
        client: redis::Client,
        config: RelayConfig,
        mut publish_rx: mpsc::Receiver<RelayEnvelope>,
        cancel: CancellationToken,
    ) {
        let mut backoff_secs = INITIAL_BACKOFF_SECS;
        // Envelope whose publish failed, retried once the connection is back
        let mut retry: Option<RelayEnvelope> = None;

        loop {
            let connected = tokio::select! {
                () = cancel.cancelled() => {
                    info!("Relay publisher cancelled");
                    return;
                }
                result = timeout(config.connect_timeout, client.get_multiplexed_async_connection()) => result,
            };

            let mut conn = match connected {
                Ok(Ok(conn)) => {
                    backoff_secs = INITIAL_BACKOFF_SECS;
                    conn
                }
                Ok(Err(e)) => {
                    error!(
                        error = %e,
                        backoff_secs = backoff_secs,
                        "Failed to get Redis connection for publishing, retrying"
                    );
                    if !wait_backoff(&cancel, backoff_secs).await {
                        return;
                    }
                    backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                    continue;
                }
                Err(_) => {
                    error!(
                        backoff_secs = backoff_secs,
                        "Timed out getting Redis connection for publishing, retrying"
                    );
                    if !wait_backoff(&cancel, backoff_secs).await {
                        return;
                    }
                    backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
                    continue;
                }
            };

            info!("Relay publisher (re)connected");

            loop {
                let envelope = match retry.take() {
                    Some(envelope) => envelope,
                    None => {
                        let next = tokio::select! {
                            () = cancel.cancelled() => {
                                info!("Relay publisher cancelled");
                                return;
                            }
                            next = publish_rx.recv() => next,
                        };
                        let Some(envelope) = next else {
                            warn!("Relay publish channel closed, exiting");
                            return;
                        };
                        envelope
                    }
                };

                match Self::publish_envelope(&mut conn, &config, &envelope).await {
                    Ok(receivers) => {
                        debug!(
                            room_id = %envelope.room_id,
                            receivers = receivers,
                            "Event published to relay"
                        );
                    }
                    Err(e) => {
                        error!(
                            error = %e,
                            room_id = %envelope.room_id,
                            "Failed to publish to relay, saving for retry after reconnect"
                        );
                        retry = Some(envelope);
                        break;
                    }
                }
            }

            if !wait_backoff(&cancel, backoff_secs).await {
                return;
            }
            backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
        }
    }

    async fn publish_envelope(
        conn: &mut MultiplexedConnection,
        config: &RelayConfig,
        envelope: &RelayEnvelope,
    ) -> anyhow::Result<usize> {
        let topic = topic_name(&config.topic_prefix, &envelope.room_id);
        let payload = envelope
            .encode()
            .context("Failed to serialize relay envelope")?;

        let receivers: usize = timeout(config.connect_timeout, conn.publish(&topic, &payload))
            .await
            .context("Timed out publishing to Redis")?
            .context("Failed to publish to Redis")?;

        Ok(receivers)
    }

    async fn run_subscriber(
        self: Arc<Self>,
        mut commands: mpsc::UnboundedReceiver<SubscriptionCommand>,
    ) {
        // Rooms with at least one local member; survives reconnects
        let mut desired: HashSet<RoomId> = HashSet::new();
        let mut backoff_secs = INITIAL_BACKOFF_SECS;

        loop {
            let exit = self.run_subscriber_session(&mut commands, &mut desired).await;
            self.state.connected.store(false, Ordering::Relaxed);

            match exit {
                SubscriberExit::Cancelled => {
                    info!("Relay subscriber cancelled");
                    return;
                }
                SubscriberExit::Disconnected => {
                    // The connection was healthy before it dropped
                    warn!(
                        topics = desired.len(),
                        "Relay subscriber lost its connection, cross-node delivery paused"
                    );
                    backoff_secs = INITIAL_BACKOFF_SECS;
                }
                SubscriberExit::ConnectFailed(e) => {
                    error!(
                        error = %e,
                        backoff_secs = backoff_secs,
                        "Relay subscriber failed to connect, retrying after backoff"
                    );
                }
            }

            if !wait_backoff(&self.cancel_token, backoff_secs).await {
                info!("Relay subscriber cancelled during backoff");
                return;
            }
            backoff_secs = (backoff_secs * 2).min(MAX_BACKOFF_SECS);
        }
    }

    async fn run_subscriber_session(
        &self,
        commands: &mut mpsc::UnboundedReceiver<SubscriptionCommand>,
        desired: &mut HashSet<RoomId>,
    ) -> SubscriberExit {
        let pubsub = tokio::select! {
            () = self.cancel_token.cancelled() => return SubscriberExit::Cancelled,
            result = timeout(self.config.connect_timeout, self.client.get_async_pubsub()) => match result {
                Ok(Ok(pubsub)) => pubsub,
                Ok(Err(e)) => {
                    return SubscriberExit::ConnectFailed(
                        anyhow::anyhow!(e).context("Failed to get Redis Pub/Sub connection"),
                    );
                }
                Err(_) => {
                    return SubscriberExit::ConnectFailed(anyhow::anyhow!(
                        "Timed out getting Redis Pub/Sub connection"
                    ));
                }
            },
        };
        let (mut sink, mut stream) = pubsub.split();

        // Transitions that happened while disconnected
        let pending = std::iter::from_fn(|| commands.try_recv().ok());
        let topics = reconcile_offline(desired, pending);

        for room_id in &topics {
            let topic = self.topic(room_id);
            if let Err(e) = sink.subscribe(&topic).await {
                return SubscriberExit::ConnectFailed(
                    anyhow::anyhow!(e).context(format!("Failed to resubscribe to {topic}")),
                );
            }
        }

        self.state.connected.store(true, Ordering::Relaxed);
        self.state.topics.store(topics.len(), Ordering::Relaxed);
        info!(topics = topics.len(), "Relay subscriber connected");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => return SubscriberExit::Cancelled,
                command = commands.recv() => {
                    // The broker owning the sender is gone
                    let Some(command) = command else {
                        return SubscriberExit::Cancelled;
                    };
                    if let Err(e) = self.apply_command(&mut sink, desired, command).await {
                        warn!(error = %e, "Relay subscription change failed, reconnecting");
                        return SubscriberExit::Disconnected;
                    }
                }
                msg = stream.next() => {
                    let Some(msg) = msg else {
                        return SubscriberExit::Disconnected;
                    };
                    let topic = msg.get_channel_name().to_string();
                    match msg.get_payload::<String>() {
                        Ok(payload) => {
                            self.dispatch(&topic, &payload);
                        }
                        Err(e) => warn!(error = %e, topic = %topic, "Invalid relay payload"),
                    }
                }
            }
        }
    }

    async fn apply_command(
        &self,
        sink: &mut PubSubSink,
        desired: &mut HashSet<RoomId>,
        command: SubscriptionCommand,
    ) -> redis::RedisResult<()> {
        match command {
            SubscriptionCommand::Subscribe(room_id) => {
                if desired.insert(room_id.clone()) {
                    let topic = self.topic(&room_id);
                    sink.subscribe(&topic).await?;
                    debug!(topic = %topic, "Subscribed to relay topic");
                }
            }
            SubscriptionCommand::Unsubscribe(room_id) => {
                if desired.remove(&room_id) {
                    let topic = self.topic(&room_id);
                    sink.unsubscribe(&topic).await?;
                    debug!(topic = %topic, "Unsubscribed from relay topic");
                }
            }
        }
        self.state.topics.store(desired.len(), Ordering::Relaxed);
        Ok(())
    }
}

/// Fold group transitions queued while the subscriber was disconnected
/// into `desired`, in arrival order, and return the rooms to subscribe on
/// the fresh connection.
///
/// Only the final state of each room matters: a room created and removed
/// while offline is never subscribed.
fn reconcile_offline(
    desired: &mut HashSet<RoomId>,
    pending: impl IntoIterator<Item = SubscriptionCommand>,
) -> Vec<RoomId> {
    for command in pending {
        match command {
            SubscriptionCommand::Subscribe(room_id) => {
                desired.insert(room_id);
            }
            SubscriptionCommand::Unsubscribe(room_id) => {
                desired.remove(&room_id);
            }
        }
    }

    let mut topics: Vec<RoomId> = desired.iter().cloned().collect();
    topics.sort();
    topics
}

/// Sleep for the backoff delay; `false` if cancelled meanwhile
async fn wait_backoff(cancel: &CancellationToken, secs: u64) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(Duration::from_secs(secs)) => true,
    }
}

/// Describes how a subscriber session ended, enabling proper backoff behavior.
enum SubscriberExit {
    /// Shutdown requested
    Cancelled,
    /// Connection was established but later dropped. Backoff is reset.
    Disconnected,
    /// Failed to connect or resubscribe. Backoff keeps increasing.
    ConnectFailed(anyhow::Error),
}
