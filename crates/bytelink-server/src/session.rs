//! Server-side session lifecycle.
//!
//! A session is one accepted connection: the core exchange pipeline
//! ([`ExchangeLink`]) plus a watcher task that runs the teardown.  Sessions
//! have no reconnect logic — when the connection dies, by peer close, socket
//! error, or server stop, the session removes itself from the registry and
//! publishes the one disconnect event for its endpoint pair.
//!
//! The registry entry ([`SessionHandle`]) is what the rest of the server
//! touches: the driver for write routing, the halt handle for forced
//! teardown, and the watcher's join handle so `stop` can await completion.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

use bytelink_core::{EventBus, ExchangeDriver, ExchangeLink, LinkAddr, LinkEvent};

/// Active sessions, keyed by endpoint pair.  Shared by every accept loop,
/// every session watcher, and the write-routing path.
pub(crate) type SessionRegistry = Arc<Mutex<HashMap<LinkAddr, SessionHandle>>>;

/// Registry entry for one live session.
pub(crate) struct SessionHandle {
    /// Send handle, used by [`ExchangeServer::write`](crate::server::ExchangeServer::write).
    pub driver: Arc<ExchangeDriver<OwnedWriteHalf>>,
    /// Forces teardown; `stop` notifies this for every drained session.
    pub halt: Arc<Notify>,
    /// The watcher task, awaited by `stop` so every disconnect event has
    /// been published before `stop` returns.
    pub task: JoinHandle<()>,
}

/// Watches one session until its link dies or the server halts it, then
/// tears it down.
///
/// The link drains all queued bytes before `shutdown` returns, so every data
/// event for this session precedes its disconnect event.  The registry
/// remove is a no-op when `stop` already drained the entry.
pub(crate) async fn run_session(
    link: ExchangeLink<OwnedWriteHalf>,
    halt: Arc<Notify>,
    registry: SessionRegistry,
    events: Arc<EventBus>,
) {
    let addr = link.addr();

    tokio::select! {
        _ = link.closed() => {
            debug!("session {addr} lost its connection");
        }
        _ = halt.notified() => {
            debug!("session {addr} halted by server");
        }
    }

    link.shutdown().await;
    registry.lock().expect("lock poisoned").remove(&addr);
    events.publish(LinkEvent::Disconnected { link: addr });
}
