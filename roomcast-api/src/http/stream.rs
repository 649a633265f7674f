//! Server-Sent Events stream controller
//!
//! One long-lived response per client connection. The response body is the
//! single writer for that connection: queued room events and heartbeat
//! frames are interleaved into it, and dropping it (client gone, write
//! failure, server shutdown) disconnects the connection from the broker.

use axum::{
    extract::State,
    response::{
        sse::{Event as SseEvent, Sse},
        IntoResponse,
    },
};
use futures::Stream;
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, warn};

use roomcast_cluster::sync::PING_EVENT;
use roomcast_cluster::{Broker, Event, EventReceiver};
use roomcast_core::models::ConnectionId;

use super::{middleware::AuthUser, AppResult, AppState};

/// Payload of every heartbeat frame
pub const KEEP_ALIVE_DATA: &str = "keep-alive";

/// Disconnects its connection when dropped.
///
/// Held by the response stream so every exit path releases the connection.
pub struct ConnectionGuard {
    broker: Arc<Broker>,
    connection_id: ConnectionId,
}

impl ConnectionGuard {
    pub fn new(broker: Arc<Broker>, connection_id: ConnectionId) -> Self {
        Self {
            broker,
            connection_id,
        }
    }

    pub const fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        if self.broker.disconnect(&self.connection_id) {
            info!(connection_id = %self.connection_id, "Event stream closed");
        }
    }
}

/// Response body of one event stream.
///
/// Queued events take priority over the heartbeat. The stream ends once the
/// broker closes the queue and everything queued has been written.
pub struct EventStream {
    guard: ConnectionGuard,
    events: UnboundedReceiverStream<Event>,
    heartbeat: Interval,
}

impl EventStream {
    pub fn new(guard: ConnectionGuard, receiver: EventReceiver, heartbeat_interval: Duration) -> Self {
        // First ping one full period after connect
        let mut heartbeat = interval_at(Instant::now() + heartbeat_interval, heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            guard,
            events: receiver.into_stream(),
            heartbeat,
        }
    }
}

impl Stream for EventStream {
    type Item = Result<SseEvent, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            match Pin::new(&mut this.events).poll_next(cx) {
                Poll::Ready(Some(event)) => match to_sse(&event) {
                    Some(frame) => return Poll::Ready(Some(Ok(frame))),
                    None => {
                        warn!(
                            connection_id = %this.guard.connection_id(),
                            event = %event.name(),
                            "Dropping event with an unwritable name"
                        );
                    }
                },
                Poll::Ready(None) => {
                    debug!(connection_id = %this.guard.connection_id(), "Event queue closed");
                    return Poll::Ready(None);
                }
                Poll::Pending => break,
            }
        }

        if this.heartbeat.poll_tick(cx).is_ready() {
            return Poll::Ready(Some(Ok(SseEvent::default()
                .event(PING_EVENT)
                .data(KEEP_ALIVE_DATA))));
        }

        Poll::Pending
    }
}

/// `event: <name>` / `data: <payload>` frame for a queued event.
///
/// `None` when the name would break the framing.
fn to_sse(event: &Event) -> Option<SseEvent> {
    let name = event.name();
    if name.is_empty() || name.contains(['\r', '\n']) {
        return None;
    }
    Some(SseEvent::default().event(name).data(event.data()))
}

/// Open an event stream for the caller and join every room they belong to
pub async fn stream_events(
    State(state): State<AppState>,
    auth: AuthUser,
) -> AppResult<impl IntoResponse> {
    let (connection_id, receiver) = state.broker.connect_user(auth.user_id.clone());
    // From here on, any early return disconnects through the guard
    let guard = ConnectionGuard::new(state.broker.clone(), connection_id.clone());

    // Queued before any join so it is always the first frame
    state
        .broker
        .send_to_connection(&connection_id, Event::connected(&connection_id))?;

    // Looked up after registering, so a concurrent room join either sees
    // this connection or is visible here
    let rooms = state.rooms.rooms_for_user(&auth.user_id).await?;
    for room_id in &rooms {
        state.broker.join(&connection_id, room_id.clone())?;
    }

    info!(
        user_id = %auth.user_id,
        connection_id = %connection_id,
        rooms = rooms.len(),
        "Event stream opened"
    );

    let stream = EventStream::new(guard, receiver, state.heartbeat_interval);

    Ok((
        // Disable proxy buffering (nginx)
        [("x-accel-buffering", "no")],
        Sse::new(stream),
    ))
}
