//! Topic-scoped event broadcasting.
//!
//! Every subscriber owns one bounded queue. Publishing never waits on it: a full
//! queue drops the event for that subscriber only, and a closed queue removes
//! the subscriber from every topic. Terminal events that find the queue full go
//! to a side slot read after the queue drains, so every stream still ends.

use foresight_training::{EventEnvelope, SessionId};
use futures::Stream;
use std::collections::HashMap;
use std::fmt;
use std::pin::Pin;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::locks::{read, write};

/// Default per-subscriber queue capacity.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// Identity of one connected subscriber.
///
/// Cloning the handle does not create a new subscriber; it is the key used by
/// `subscribe`/`unsubscribe`.
#[derive(Clone)]
pub struct SubscriberHandle {
    id: u64,
    tx: mpsc::Sender<EventEnvelope>,
    overflow: mpsc::UnboundedSender<EventEnvelope>,
}

impl SubscriberHandle {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl PartialEq for SubscriberHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SubscriberHandle {}

impl fmt::Debug for SubscriberHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberHandle").field("id", &self.id).finish()
    }
}

/// Receiving end of a subscriber's queue.
///
/// Dropping the stream disconnects the subscriber; the broadcaster prunes it on
/// the next publish to any of its topics.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<EventEnvelope>,
    overflow: mpsc::UnboundedReceiver<EventEnvelope>,
}

impl EventStream {
    /// Waits for the next event. Returns `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<EventEnvelope> {
        std::future::poll_fn(|cx| self.poll_event(cx)).await
    }

    /// Returns an already-queued event without waiting.
    pub fn try_recv(&mut self) -> Option<EventEnvelope> {
        self.rx.try_recv().ok().or_else(|| self.overflow.try_recv().ok())
    }

    /// Queued events come first; an overflowed terminal event only once the
    /// queue is empty.
    fn poll_event(&mut self, cx: &mut Context<'_>) -> Poll<Option<EventEnvelope>> {
        let queued = self.rx.poll_recv(cx);
        if let Poll::Ready(Some(event)) = queued {
            return Poll::Ready(Some(event));
        }
        match self.overflow.poll_recv(cx) {
            Poll::Ready(Some(event)) => Poll::Ready(Some(event)),
            Poll::Ready(None) if queued.is_ready() => Poll::Ready(None),
            _ => Poll::Pending,
        }
    }

    /// Collects queued events until the first terminal one (inclusive).
    pub async fn until_terminal(&mut self) -> Vec<EventEnvelope> {
        let mut events = Vec::new();
        while let Some(event) = self.recv().await {
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                break;
            }
        }
        events
    }
}

impl Stream for EventStream {
    type Item = EventEnvelope;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.poll_event(cx)
    }
}

/// Topic-based publish/subscribe primitive, independent of any transport.
pub struct EventBroadcaster {
    topics: RwLock<HashMap<SessionId, Vec<SubscriberHandle>>>,
    next_id: AtomicU64,
    buffer: usize,
}

impl EventBroadcaster {
    /// Creates a broadcaster whose subscriber queues hold `buffer` events.
    #[must_use]
    pub fn new(buffer: usize) -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
        }
    }

    /// Registers a new subscriber.
    ///
    /// # Returns
    /// The handle used to (un)subscribe and the stream its events arrive on.
    pub fn connect(&self) -> (SubscriberHandle, EventStream) {
        let (tx, rx) = mpsc::channel(self.buffer);
        let (overflow_tx, overflow_rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(subscriber = id, "subscriber_connected");
        let handle = SubscriberHandle { id, tx, overflow: overflow_tx };
        (handle, EventStream { rx, overflow: overflow_rx })
    }

    /// Adds `handle` to `topic` and sends it the join snapshot.
    ///
    /// Subscribing twice is a no-op.
    ///
    /// # Returns
    /// `true` if the subscription was created by this call.
    pub fn subscribe(&self, topic: &SessionId, handle: &SubscriberHandle) -> bool {
        let mut topics = write(&self.topics);
        let subscribers = topics.entry(topic.clone()).or_default();
        if subscribers.contains(handle) {
            return false;
        }
        subscribers.push(handle.clone());
        // Sent under the write lock so it lands ahead of any concurrent publish.
        if let Err(e) = handle.tx.try_send(EventEnvelope::status_snapshot(topic.clone())) {
            warn!(session_id = %topic, subscriber = handle.id, error = %e, "join_snapshot_not_delivered");
        }
        debug!(session_id = %topic, subscriber = handle.id, "subscriber_joined");
        true
    }

    /// Removes `handle` from `topic`. Removing an absent handle is a no-op.
    pub fn unsubscribe(&self, topic: &SessionId, handle: &SubscriberHandle) -> bool {
        let mut topics = write(&self.topics);
        let Some(subscribers) = topics.get_mut(topic) else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|s| s != handle);
        let removed = subscribers.len() != before;
        if subscribers.is_empty() {
            topics.remove(topic);
        }
        if removed {
            debug!(session_id = %topic, subscriber = handle.id, "subscriber_left");
        }
        removed
    }

    /// Removes `handle` from every topic.
    pub fn disconnect(&self, handle: &SubscriberHandle) {
        let mut topics = write(&self.topics);
        topics.retain(|_, subscribers| {
            subscribers.retain(|s| s != handle);
            !subscribers.is_empty()
        });
        debug!(subscriber = handle.id, "subscriber_disconnected");
    }

    /// Delivers `envelope` to every current subscriber of `topic`.
    ///
    /// Never blocks and never fails; per-subscriber delivery problems are logged.
    ///
    /// # Returns
    /// The number of subscribers the event was queued for.
    pub fn publish(&self, topic: &SessionId, envelope: &EventEnvelope) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();
        {
            let topics = read(&self.topics);
            let Some(subscribers) = topics.get(topic) else {
                return 0;
            };
            for subscriber in subscribers {
                match subscriber.tx.try_send(envelope.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(event)) if event.is_terminal() => {
                        if subscriber.overflow.send(event).is_ok() {
                            debug!(session_id = %topic, subscriber = subscriber.id, "terminal_event_overflowed");
                            delivered += 1;
                        } else {
                            closed.push(subscriber.id);
                        }
                    }
                    Err(TrySendError::Full(_)) => {
                        warn!(
                            session_id = %topic,
                            subscriber = subscriber.id,
                            event = %envelope.event,
                            "subscriber_queue_full_event_dropped"
                        );
                    }
                    Err(TrySendError::Closed(_)) => {
                        warn!(session_id = %topic, subscriber = subscriber.id, "subscriber_gone");
                        closed.push(subscriber.id);
                    }
                }
            }
        }
        if !closed.is_empty() {
            self.prune(&closed);
        }
        delivered
    }

    /// Current number of subscribers of `topic`.
    pub fn subscriber_count(&self, topic: &SessionId) -> usize {
        read(&self.topics).get(topic).map_or(0, Vec::len)
    }

    fn prune(&self, ids: &[u64]) {
        let mut topics = write(&self.topics);
        topics.retain(|_, subscribers| {
            subscribers.retain(|s| !ids.contains(&s.id));
            !subscribers.is_empty()
        });
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

impl fmt::Debug for EventBroadcaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBroadcaster")
            .field("topics", &read(&self.topics).len())
            .field("buffer", &self.buffer)
            .finish_non_exhaustive()
    }
}
