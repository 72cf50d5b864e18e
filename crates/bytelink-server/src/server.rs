//! The multi-endpoint exchange server.
//!
//! [`ExchangeServer`] binds one TCP listener per configured endpoint and
//! runs an independent accept loop for each.  Every accepted connection
//! becomes a session in a registry shared across all loops, keyed by its
//! (local, remote) endpoint pair; [`ExchangeServer::write`] routes outbound
//! bytes through that key.
//!
//! The per-endpoint connection cap is enforced at the registry, not the
//! listen backlog: an over-cap connection is accepted by the OS and then
//! closed immediately, with no event on this side.  The rejected peer
//! briefly observes a successful connect followed by an instant close —
//! that sequence is the contract for cap overflow, so clients must tolerate
//! it.  The registry lock spans the whole admit decision, so two accept
//! loops can never both squeeze a connection past the cap.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use bytelink_core::{
    EventBus, ExchangeDriver, ExchangeLink, LinkAddr, LinkContext, LinkEvent, Subscription,
};

use crate::config::ListenerConfig;
use crate::session::{run_session, SessionHandle, SessionRegistry};

/// Bytes read from a session's socket per read call.
const SESSION_READ_BUFFER: usize = 1024;

/// Errors surfaced on the server's synchronous control path.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A configured endpoint could not be bound.  Listeners bound earlier in
    /// the same `start` call have been released; the server stays stopped.
    #[error("failed to bind listener on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    /// A listener config carried a zero connection cap.
    #[error("listener on {endpoint} configured with max_clients = 0")]
    ZeroCap { endpoint: SocketAddr },
}

/// State shared between the control surface, the accept loops, and the
/// session watchers.
struct Shared {
    events: Arc<EventBus>,
    registry: SessionRegistry,
    data_trace: Arc<AtomicBool>,
    read_buffer_size: Arc<AtomicUsize>,
}

/// Handle to one running accept loop.
struct ListenerHandle {
    stop: Arc<Notify>,
    task: JoinHandle<()>,
}

/// Server side of the exchange layer: N listeners, one session registry.
pub struct ExchangeServer {
    shared: Arc<Shared>,
    started: AtomicBool,
    listeners: Mutex<Vec<ListenerHandle>>,
}

impl ExchangeServer {
    /// Creates a stopped server with no listeners.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                events: Arc::new(EventBus::new()),
                registry: Arc::new(Mutex::new(HashMap::new())),
                data_trace: Arc::new(AtomicBool::new(false)),
                read_buffer_size: Arc::new(AtomicUsize::new(SESSION_READ_BUFFER)),
            }),
            started: AtomicBool::new(false),
            listeners: Mutex::new(Vec::new()),
        }
    }

    // ── Control surface ───────────────────────────────────────────────────────

    /// Binds every configured endpoint and begins accepting.
    ///
    /// Publishes one started event, then one listening event per config in
    /// the order supplied, all before returning.  An empty config list is
    /// valid: the server starts with zero listeners.  Calling `start` while
    /// started is a no-op returning success.
    ///
    /// # Errors
    ///
    /// [`ServerError::Bind`] if any endpoint cannot be bound (listeners
    /// bound earlier in the call are released, and the server stays
    /// stopped); [`ServerError::ZeroCap`] for a cap of zero.
    pub async fn start(&self, configs: Vec<ListenerConfig>) -> Result<(), ServerError> {
        if self.started.load(Ordering::SeqCst) {
            return Ok(());
        }

        for config in &configs {
            if config.max_clients == 0 {
                return Err(ServerError::ZeroCap {
                    endpoint: config.endpoint,
                });
            }
        }

        // Bind everything before accepting anything, so a failure part-way
        // leaves no listener behind (dropping a TcpListener closes it).
        let mut bound = Vec::with_capacity(configs.len());
        for config in &configs {
            let listener = TcpListener::bind(config.endpoint)
                .await
                .map_err(|source| ServerError::Bind {
                    addr: config.endpoint,
                    source,
                })?;
            // Resolves port 0 to the actual bound port.
            let local = listener
                .local_addr()
                .map_err(|source| ServerError::Bind {
                    addr: config.endpoint,
                    source,
                })?;
            bound.push((listener, local, config.max_clients));
        }

        self.started.store(true, Ordering::SeqCst);
        info!("server started with {} listener(s)", bound.len());
        self.shared.events.publish(LinkEvent::Started);

        let mut handles = Vec::with_capacity(bound.len());
        for (listener, local, max_clients) in bound {
            info!("listening on {local} (cap {max_clients})");
            self.shared.events.publish(LinkEvent::Listening { endpoint: local });

            let stop = Arc::new(Notify::new());
            let task = tokio::spawn(run_accept_loop(
                listener,
                local,
                max_clients,
                Arc::clone(&self.shared),
                Arc::clone(&stop),
            ));
            handles.push(ListenerHandle { stop, task });
        }
        *self.listeners.lock().expect("lock poisoned") = handles;

        Ok(())
    }

    /// Stops accepting and tears down every active session.
    ///
    /// Each previously-connected peer receives exactly one disconnect event,
    /// all published before this returns, followed by one stopped event.
    /// A no-op when already stopped.
    pub async fn stop(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }

        // Listeners first, so no new session slips in during the drain.
        let listeners: Vec<ListenerHandle> = self
            .listeners
            .lock()
            .expect("lock poisoned")
            .drain(..)
            .collect();
        for listener in &listeners {
            listener.stop.notify_one();
        }
        for listener in listeners {
            let _ = listener.task.await;
        }

        let sessions: Vec<SessionHandle> = self
            .shared
            .registry
            .lock()
            .expect("lock poisoned")
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for session in &sessions {
            session.halt.notify_one();
        }
        for session in sessions {
            let _ = session.task.await;
        }

        info!("server stopped");
        self.shared.events.publish(LinkEvent::Stopped);
    }

    /// Stops the server and releases everything it holds.  Equivalent to
    /// [`stop`](Self::stop); provided so both halves of the layer expose the
    /// same disposal verb.
    pub async fn shutdown(&self) {
        self.stop().await;
    }

    /// Routes `data` to the session keyed by (`local`, `remote`).
    ///
    /// Returns `false` without raising any event when no such session
    /// exists.  Trace semantics per [`ExchangeDriver::send`].
    pub async fn write(&self, data: &[u8], remote: SocketAddr, local: SocketAddr) -> bool {
        let key = LinkAddr::new(local, remote);
        let driver = self
            .shared
            .registry
            .lock()
            .expect("lock poisoned")
            .get(&key)
            .map(|session| Arc::clone(&session.driver));
        match driver {
            Some(driver) => driver.send(data).await,
            None => false,
        }
    }

    // ── Observable state & knobs ──────────────────────────────────────────────

    /// Registers an event subscriber.  See [`EventBus::subscribe`].
    pub fn subscribe(&self) -> Subscription {
        self.shared.events.subscribe()
    }

    /// Whether the most recent control call was `start`.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Endpoint pairs of all currently active sessions, in no particular
    /// order.
    pub fn active_sessions(&self) -> Vec<LinkAddr> {
        self.shared
            .registry
            .lock()
            .expect("lock poisoned")
            .keys()
            .copied()
            .collect()
    }

    /// Enables or disables send/receive trace events.  One flag for every
    /// session, current and future; read at each send/receive, never cached.
    pub fn set_data_trace(&self, enabled: bool) {
        self.shared.data_trace.store(enabled, Ordering::Relaxed);
    }

    /// Current trace flag.
    pub fn data_trace(&self) -> bool {
        self.shared.data_trace.load(Ordering::Relaxed)
    }
}

impl Default for ExchangeServer {
    fn default() -> Self {
        Self::new()
    }
}

// ── Accept loop ───────────────────────────────────────────────────────────────

/// Accepts connections on one endpoint until stopped.
///
/// Accept errors are recoverable: they are reported and the loop continues.
async fn run_accept_loop(
    listener: TcpListener,
    local: SocketAddr,
    max_clients: usize,
    shared: Arc<Shared>,
    stop: Arc<Notify>,
) {
    loop {
        tokio::select! {
            _ = stop.notified() => {
                debug!("accept loop on {local} stopped");
                break;
            }
            result = listener.accept() => match result {
                Ok((stream, peer)) => admit(&shared, stream, local, peer, max_clients),
                Err(e) => {
                    warn!("accept error on {local}: {e}");
                    shared.events.publish(LinkEvent::RecoverableError {
                        detail: format!("accept on {local} failed: {e}"),
                    });
                }
            }
        }
    }
}

/// Admits or rejects one accepted connection.
///
/// Runs entirely under the registry lock: the cap count, the registry
/// insert, and the connect event are one atomic step, so concurrent accept
/// loops cannot overshoot the cap, and a `write` reacting to the connect
/// event always finds the session.  Everything here is synchronous; task
/// spawns return immediately.
fn admit(
    shared: &Arc<Shared>,
    stream: TcpStream,
    local: SocketAddr,
    peer: SocketAddr,
    max_clients: usize,
) {
    let mut registry = shared.registry.lock().expect("lock poisoned");

    let active = registry.keys().filter(|key| key.local == local).count();
    if active >= max_clients {
        // Accept-then-immediate-close, no event: the peer observes a
        // connect followed by an instant disconnect.
        debug!("rejecting {peer} on {local}: at cap ({active}/{max_clients})");
        drop(stream);
        return;
    }

    let addr = LinkAddr::new(local, peer);
    info!("session admitted: {addr} ({}/{max_clients})", active + 1);

    let (reader, writer) = stream.into_split();
    let driver = Arc::new(ExchangeDriver::new(
        writer,
        addr,
        Arc::clone(&shared.events),
        Arc::clone(&shared.data_trace),
    ));

    // Connect event before the pipeline exists, so no data event for this
    // session can precede it.
    shared.events.publish(LinkEvent::Connected { link: addr });

    let link = ExchangeLink::spawn_with_driver(
        reader,
        Arc::clone(&driver),
        LinkContext {
            addr,
            events: Arc::clone(&shared.events),
            data_trace: Arc::clone(&shared.data_trace),
            read_buffer_size: Arc::clone(&shared.read_buffer_size),
        },
    );

    let halt = Arc::new(Notify::new());
    let task = tokio::spawn(run_session(
        link,
        Arc::clone(&halt),
        Arc::clone(&shared.registry),
        Arc::clone(&shared.events),
    ));

    registry.insert(addr, SessionHandle { driver, halt, task });
}

// ── Tests ─────────────────────────────────────────────────────────────────────
