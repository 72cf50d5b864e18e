//! Event model and delivery.
//!
//! Everything the exchange layer tells the outside world is a [`LinkEvent`]
//! published on an [`EventBus`].  Collaborators call [`EventBus::subscribe`]
//! to get their own receiver; the bus clones every event to every live
//! subscriber in publish order.
//!
//! Delivery contract: a subscriber sees every event published after it
//! subscribed, in order, with none dropped.  The channel is unbounded, so a
//! slow subscriber delays nothing and loses nothing; it only grows its own
//! queue.  A subscriber that drops its receiver is pruned on the next
//! publish.

use std::net::SocketAddr;
use std::sync::Mutex;

use tokio::sync::mpsc;

use crate::addr::LinkAddr;

/// Receiver half handed out by [`EventBus::subscribe`].
pub type Subscription = mpsc::UnboundedReceiver<LinkEvent>;

/// Notifications emitted by the client and server exchange layers.
///
/// Per-connection events carry the [`LinkAddr`] they concern.  For a given
/// connection, `Connected` is always observed before any `DataReceived` or
/// `Disconnected` for it, and `Disconnected` fires exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The owning client or server transitioned to started.
    Started,
    /// The owning client or server transitioned to stopped.
    Stopped,
    /// A server listener is bound and accepting (server only).
    Listening { endpoint: SocketAddr },
    /// The client is about to attempt a connection (client only).
    Reconnecting,
    /// A connection is established.
    Connected { link: LinkAddr },
    /// A connection ended, whether by peer, error, or stop.
    Disconnected { link: LinkAddr },
    /// An outbound connection attempt failed; retried automatically.
    ConnectionFailed { reason: String },
    /// Bytes delivered by a connection's dispatch loop, one event per byte.
    DataReceived { data: Vec<u8>, link: LinkAddr },
    /// Mirror of bytes successfully written, present only while the data
    /// trace flag is on.
    SendTrace { data: Vec<u8>, link: LinkAddr },
    /// Mirror of received bytes about to be delivered, present only while
    /// the data trace flag is on.  Precedes the matching `DataReceived`.
    ReceiveTrace { data: Vec<u8>, link: LinkAddr },
    /// A background loop hit an unexpected error and kept running.
    RecoverableError { detail: String },
}

/// Fans [`LinkEvent`]s out to any number of subscribers.
///
/// Publishing never blocks: each subscriber is backed by an unbounded
/// channel.  The bus is shared behind an `Arc` by every loop that raises
/// events (client supervisor, server accept loops, per-connection pipelines).
pub struct EventBus {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<LinkEvent>>>,
}

impl EventBus {
    /// Creates a bus with no subscribers.
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Registers a new subscriber and returns its receiver.
    ///
    /// The subscriber observes every event published from this point on.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().expect("lock poisoned").push(tx);
        rx
    }

    /// Publishes `event` to every live subscriber, pruning closed ones.
    pub fn publish(&self, event: LinkEvent) {
        let mut subscribers = self.subscribers.lock().expect("lock poisoned");
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of subscribers still holding their receiver, as of the last
    /// publish.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().expect("lock poisoned").len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
