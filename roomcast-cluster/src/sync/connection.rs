use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use roomcast_core::models::{ConnectionId, RoomId, UserId};

use super::events::Event;

/// Outbound queue sender for a connection
pub type EventSender = mpsc::UnboundedSender<Event>;

/// Group memberships of a connection, guarded together with its closed flag
#[derive(Debug, Default)]
pub(crate) struct Membership {
    pub(crate) groups: HashSet<RoomId>,
    pub(crate) closed: bool,
}

/// One live client stream.
///
/// Owns the producer side of an unbounded FIFO queue. The queue is closed at
/// most once; enqueueing after close is a silent no-op.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    /// Authenticated owner, if the stream was opened on behalf of a user
    user_id: Option<UserId>,
    connected_at: Instant,
    /// `None` once closed. Writers hold the read lock while sending so that
    /// `close` cannot complete while an enqueue is in flight.
    sender: RwLock<Option<EventSender>>,
    membership: Mutex<Membership>,
}

impl Connection {
    /// Create a connection and the receiving end of its queue
    pub(crate) fn open(id: ConnectionId, user_id: Option<UserId>) -> (Arc<Self>, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Arc::new(Self {
            id: id.clone(),
            user_id,
            connected_at: Instant::now(),
            sender: RwLock::new(Some(tx)),
            membership: Mutex::new(Membership::default()),
        });
        (connection, EventReceiver { connection_id: id, rx })
    }

    #[must_use]
    pub const fn id(&self) -> &ConnectionId {
        &self.id
    }

    #[must_use]
    pub const fn user_id(&self) -> Option<&UserId> {
        self.user_id.as_ref()
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        self.connected_at.elapsed()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.sender.read().is_none()
    }

    /// Push an event onto the queue.
    ///
    /// Returns `false` if the queue is closed or its reader is gone.
    pub fn enqueue(&self, event: Event) -> bool {
        match self.sender.read().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Snapshot of the groups this connection belongs to
    #[must_use]
    pub fn groups(&self) -> Vec<RoomId> {
        self.membership.lock().groups.iter().cloned().collect()
    }

    pub(crate) fn membership(&self) -> MutexGuard<'_, Membership> {
        self.membership.lock()
    }

    /// Close the queue. The reader still drains what was already enqueued.
    ///
    /// Returns `true` only for the call that actually closed it.
    pub(crate) fn close(&self) -> bool {
        self.sender.write().take().is_some()
    }
}

/// Reading end of a connection's queue.
///
/// Yields events in enqueue order and ends after the connection is closed
/// and every queued event has been read.
#[derive(Debug)]
pub struct EventReceiver {
    connection_id: ConnectionId,
    rx: mpsc::UnboundedReceiver<Event>,
}

impl EventReceiver {
    #[must_use]
    pub const fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    /// Wait for the next event; `None` once the queue is closed and drained
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Next event if one is ready
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Adapt into a `Stream` of events
    #[must_use]
    pub fn into_stream(self) -> UnboundedReceiverStream<Event> {
        UnboundedReceiverStream::new(self.rx)
    }
}
