//! In-process fan-out of store mutations to live-update subscribers.
//!
//! Every subscriber owns its own unbounded inbox, so a broadcast never waits
//! on a slow reader. Heartbeats are generated on the reading side: a
//! subscription that stays idle for the configured window yields a synthetic
//! [`Event::Ping`] instead of waiting forever.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, trace};

/// Idle window after which a subscription produces a heartbeat.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(60);

/// A live-update event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Sent once, as the first event of every subscription.
    Connected,
    /// A message was stored; carries its id.
    AddMessage(i64),
    /// A single message was deleted; carries its id.
    DeleteMessage(i64),
    /// Every message was deleted.
    DeleteMessages,
    /// Synthetic keep-alive after an idle window.
    Ping,
}

impl Event {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::AddMessage(_) => "add_message",
            Self::DeleteMessage(_) => "delete_message",
            Self::DeleteMessages => "delete_messages",
            Self::Ping => "ping",
        }
    }

    /// Payload carried in the `data:` line, if any.
    pub fn payload(&self) -> Option<String> {
        match self {
            Self::AddMessage(id) | Self::DeleteMessage(id) => Some(id.to_string()),
            _ => None,
        }
    }

    /// Encode as a stream frame: `event: <name>\r\ndata: <payload>\r\n\r\n`.
    pub fn encode(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "event: {}\r\ndata: {}\r\n\r\n",
            self.name(),
            self.payload().unwrap_or_default()
        )
    }
}

#[derive(Default)]
struct BusInner {
    subscribers: Mutex<HashMap<u64, UnboundedSender<Event>>>,
    next_id: AtomicU64,
}

impl BusInner {
    /// A panicking subscriber must not take the bus down with it.
    fn subscribers(&self) -> MutexGuard<'_, HashMap<u64, UnboundedSender<Event>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn remove(&self, id: u64) {
        if self.subscribers().remove(&id).is_some() {
            debug!(subscriber = id, "Subscriber detached");
        }
    }
}

/// Publish/subscribe hub for store mutations.
///
/// Cloning is cheap and every clone talks to the same subscriber set.
#[derive(Clone, Default)]
pub struct NotificationBus {
    inner: Arc<BusInner>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber. Its first event is always [`Event::Connected`].
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        // The receiver is still held locally, so this cannot fail.
        let _ = tx.send(Event::Connected);

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers().insert(id, tx);
        debug!(subscriber = id, "Subscriber attached");

        Subscription {
            id,
            inbox: rx,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Deliver `event` to every current subscriber without blocking.
    ///
    /// Subscribers whose inbox has gone away are pruned.
    pub fn broadcast(&self, event: Event) {
        let mut subscribers = self.inner.subscribers();
        trace!(event = event.name(), subscribers = subscribers.len(), "Broadcasting");
        subscribers.retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    /// Remove a subscriber by id. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: u64) {
        self.inner.remove(id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers().len()
    }
}

/// One subscriber's inbox. Dropping it deregisters the subscriber.
pub struct Subscription {
    id: u64,
    inbox: UnboundedReceiver<Event>,
    bus: Weak<BusInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Wait for the next event, producing [`Event::Ping`] after `idle` of silence.
    ///
    /// Returns `None` once the bus itself is gone.
    pub async fn recv(&mut self, idle: Duration) -> Option<Event> {
        match tokio::time::timeout(idle, self.inbox.recv()).await {
            Ok(event) => event,
            Err(_) => Some(Event::Ping),
        }
    }

    /// Take the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.inbox.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
