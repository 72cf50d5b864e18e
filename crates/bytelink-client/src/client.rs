//! The reconnecting exchange client.
//!
//! [`ExchangeClient`] owns one outbound TCP connection and a background
//! supervisor task that keeps it alive:
//!
//! - While started and disconnected, the supervisor attempts a connect,
//!   publishing a reconnecting event before each try and a connection-failed
//!   event (then a `connect_interval` pause) after each failure.  Retries
//!   never stop on their own.
//! - While connected, the supervisor sleeps `poll_interval`, then probes the
//!   peer's address with the injected [`LivenessProbe`].  `poll_fail_limit`
//!   consecutive probe failures force a disconnect of an otherwise
//!   healthy-looking socket; one success resets the count.
//! - The per-connection read and dispatch loops are the shared
//!   [`ExchangeLink`] pipeline from `bytelink-core`; the supervisor only
//!   watches for the link to die and runs the teardown.
//!
//! `start`/`stop` are cheap flag flips observed by the supervisor within one
//! iteration; [`ExchangeClient::shutdown`] ends the supervisor for good and
//! guarantees no further events once it returns.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use bytelink_core::{EventBus, ExchangeDriver, ExchangeLink, LinkAddr, LinkContext, LinkEvent, Subscription};

use crate::config::ClientConfig;
use crate::probe::{LivenessProbe, UdpProbe};

/// What ended one poll cycle of a connected client.
enum PollOutcome {
    /// The connection itself died (peer closed, error, or halt).
    LinkClosed,
    /// `start`/`stop`/`shutdown` changed state; re-evaluate before probing.
    Woken,
    /// The poll interval elapsed; time for a liveness probe.
    ProbeDue,
}

/// Client side of the exchange layer: one supervised outbound connection.
///
/// All methods are callable from any task.  Observable state (`is_started`,
/// `is_connected`) is backed by atomics the supervisor keeps current.
pub struct ExchangeClient {
    events: Arc<EventBus>,
    probe: Arc<dyn LivenessProbe>,
    data_trace: Arc<AtomicBool>,

    // Knobs, re-read by the supervisor each iteration.
    poll_fail_limit: AtomicU32,
    poll_interval_ms: AtomicU64,
    connect_interval_ms: AtomicU64,
    read_buffer_size: Arc<AtomicUsize>,

    started: AtomicBool,
    connected: AtomicBool,
    shutting_down: AtomicBool,
    target: Mutex<Option<SocketAddr>>,

    /// Send handle of the live connection, if any.
    driver: Mutex<Option<Arc<ExchangeDriver<OwnedWriteHalf>>>>,
    /// Wakes the supervisor out of idles and sleeps on any state change.
    wake: Notify,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl ExchangeClient {
    /// Spawns a client with the default [`UdpProbe`].
    ///
    /// Must be called from within a Tokio runtime; the supervisor task starts
    /// immediately but idles until [`start`](Self::start).
    pub fn spawn(config: ClientConfig) -> Arc<Self> {
        let probe = Arc::new(UdpProbe::new(config.probe_timeout));
        Self::spawn_with_probe(config, probe)
    }

    /// Spawns a client with an injected liveness probe.
    pub fn spawn_with_probe(config: ClientConfig, probe: Arc<dyn LivenessProbe>) -> Arc<Self> {
        let client = Arc::new(Self {
            events: Arc::new(EventBus::new()),
            probe,
            data_trace: Arc::new(AtomicBool::new(false)),
            poll_fail_limit: AtomicU32::new(config.poll_fail_limit.max(1)),
            poll_interval_ms: AtomicU64::new(config.poll_interval.as_millis() as u64),
            connect_interval_ms: AtomicU64::new(config.connect_interval.as_millis() as u64),
            read_buffer_size: Arc::new(AtomicUsize::new(config.read_buffer_size.max(1))),
            started: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            target: Mutex::new(None),
            driver: Mutex::new(None),
            wake: Notify::new(),
            supervisor: Mutex::new(None),
        });

        let handle = tokio::spawn(Arc::clone(&client).run_supervisor());
        *client.supervisor.lock().expect("lock poisoned") = Some(handle);
        client
    }

    // ── Control surface ───────────────────────────────────────────────────────

    /// Sets the target endpoint and flips the client to started.
    ///
    /// Idempotent beyond overwriting the target: only a stopped→started
    /// transition publishes a started event.  A target change takes effect on
    /// the next connect attempt; an existing connection is left alone.
    pub fn start(&self, endpoint: SocketAddr) {
        *self.target.lock().expect("lock poisoned") = Some(endpoint);
        if !self.started.swap(true, Ordering::SeqCst) {
            info!("client started toward {endpoint}");
            self.events.publish(LinkEvent::Started);
        }
        self.wake.notify_one();
    }

    /// Flips the client to stopped and clears the target.
    ///
    /// The supervisor tears any live connection down (publishing its
    /// disconnect event) within one iteration.  Only a started→stopped
    /// transition publishes a stopped event.
    pub fn stop(&self) {
        if self.started.swap(false, Ordering::SeqCst) {
            *self.target.lock().expect("lock poisoned") = None;
            info!("client stopped");
            self.events.publish(LinkEvent::Stopped);
        }
        self.wake.notify_one();
    }

    /// Sends `data` through the live connection.
    ///
    /// Returns `false`, with no partial-success indication, when not
    /// connected.  Trace semantics per [`ExchangeDriver::send`].
    pub async fn send_data(&self, data: &[u8]) -> bool {
        let driver = self.driver.lock().expect("lock poisoned").clone();
        match driver {
            Some(driver) => driver.send(data).await,
            None => false,
        }
    }

    /// Stops the client and ends the supervisor for good.
    ///
    /// Any live connection is torn down (its disconnect event included)
    /// before this returns; afterwards no further events fire.  Irreversible.
    pub async fn shutdown(&self) {
        self.stop();
        self.shutting_down.store(true, Ordering::SeqCst);
        self.wake.notify_one();

        let handle = self.supervisor.lock().expect("lock poisoned").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    // ── Observable state & knobs ──────────────────────────────────────────────

    /// Registers an event subscriber.  See [`EventBus::subscribe`].
    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    /// Whether the most recent control call was `start`.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Whether a connection is currently established.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// The endpoint `start` was last called with, until `stop` clears it.
    pub fn remote_endpoint(&self) -> Option<SocketAddr> {
        *self.target.lock().expect("lock poisoned")
    }

    /// Enables or disables send/receive trace events.  Takes effect on the
    /// very next send or receive, including on a live connection.
    pub fn set_data_trace(&self, enabled: bool) {
        self.data_trace.store(enabled, Ordering::Relaxed);
    }

    /// Current trace flag.
    pub fn data_trace(&self) -> bool {
        self.data_trace.load(Ordering::Relaxed)
    }

    /// Consecutive probe failures that force a disconnect (minimum 1).
    pub fn set_poll_fail_limit(&self, limit: u32) {
        self.poll_fail_limit.store(limit.max(1), Ordering::Relaxed);
    }

    /// Pause between liveness probes; applies from the next poll cycle.
    pub fn set_poll_interval(&self, interval: Duration) {
        self.poll_interval_ms
            .store(interval.as_millis() as u64, Ordering::Relaxed);
    }

    /// Pause between connect attempts; applies from the next retry.
    pub fn set_connect_interval(&self, interval: Duration) {
        self.connect_interval_ms
            .store(interval.as_millis() as u64, Ordering::Relaxed);
    }

    /// Read chunk size; the read loop picks it up before its next read.
    pub fn set_read_buffer_size(&self, size: usize) {
        self.read_buffer_size.store(size.max(1), Ordering::Relaxed);
    }

    // ── Supervisor ────────────────────────────────────────────────────────────

    /// The connect/poll loop.  Sole owner of the live [`ExchangeLink`].
    async fn run_supervisor(self: Arc<Self>) {
        let mut link: Option<ExchangeLink<OwnedWriteHalf>> = None;
        let mut probe_failures: u32 = 0;

        loop {
            if self.shutting_down.load(Ordering::SeqCst) {
                break;
            }

            if !self.started.load(Ordering::SeqCst) {
                if let Some(link) = link.take() {
                    self.teardown(link).await;
                }
                self.wake.notified().await;
                continue;
            }

            if link.is_none() {
                let target = *self.target.lock().expect("lock poisoned");
                let Some(target) = target else {
                    self.wake.notified().await;
                    continue;
                };

                match self.try_connect(target).await {
                    Some(new_link) => {
                        probe_failures = 0;
                        link = Some(new_link);
                    }
                    None => {
                        let pause =
                            Duration::from_millis(self.connect_interval_ms.load(Ordering::Relaxed));
                        tokio::select! {
                            _ = sleep(pause) => {}
                            _ = self.wake.notified() => {}
                        }
                    }
                }
                continue;
            }

            // Connected: one poll cycle.
            let (outcome, remote_ip) = {
                let Some(live) = link.as_ref() else {
                    continue;
                };
                let remote_ip = live.addr().remote.ip();
                let pause = Duration::from_millis(self.poll_interval_ms.load(Ordering::Relaxed));
                let outcome = tokio::select! {
                    _ = live.closed() => PollOutcome::LinkClosed,
                    _ = self.wake.notified() => PollOutcome::Woken,
                    _ = sleep(pause) => PollOutcome::ProbeDue,
                };
                (outcome, remote_ip)
            };

            match outcome {
                PollOutcome::LinkClosed => {
                    if let Some(link) = link.take() {
                        self.teardown(link).await;
                    }
                }
                PollOutcome::Woken => {}
                PollOutcome::ProbeDue => {
                    if self.probe.probe(remote_ip).await {
                        probe_failures = 0;
                    } else {
                        probe_failures += 1;
                        let limit = self.poll_fail_limit.load(Ordering::Relaxed).max(1);
                        debug!("liveness probe of {remote_ip} failed ({probe_failures}/{limit})");
                        if probe_failures >= limit {
                            warn!("peer {remote_ip} failed {limit} consecutive probes; dropping connection");
                            probe_failures = 0;
                            if let Some(link) = link.take() {
                                self.teardown(link).await;
                            }
                        }
                    }
                }
            }
        }

        if let Some(link) = link.take() {
            self.teardown(link).await;
        }
    }

    /// One connect attempt.  On success publishes the connect event and
    /// spawns the exchange pipeline; on failure publishes connection-failed.
    async fn try_connect(&self, target: SocketAddr) -> Option<ExchangeLink<OwnedWriteHalf>> {
        self.events.publish(LinkEvent::Reconnecting);

        let stream = match TcpStream::connect(target).await {
            Ok(stream) => stream,
            Err(e) => {
                debug!("connect to {target} failed: {e}");
                self.events.publish(LinkEvent::ConnectionFailed {
                    reason: format!("connect to {target} failed: {e}"),
                });
                return None;
            }
        };

        let local = match stream.local_addr() {
            Ok(local) => local,
            Err(e) => {
                self.events.publish(LinkEvent::ConnectionFailed {
                    reason: format!("connected to {target} but local address lookup failed: {e}"),
                });
                return None;
            }
        };

        let addr = LinkAddr::new(local, target);
        info!("connected: {addr}");

        // The send handle and the connected flag go live before the connect
        // event, and the pipeline tasks only after it: a subscriber reacting
        // to the event can send immediately, and no data event can slip
        // ahead of the connect event.
        let (reader, writer) = stream.into_split();
        let driver = Arc::new(ExchangeDriver::new(
            writer,
            addr,
            Arc::clone(&self.events),
            Arc::clone(&self.data_trace),
        ));
        *self.driver.lock().expect("lock poisoned") = Some(Arc::clone(&driver));
        self.connected.store(true, Ordering::SeqCst);
        self.events.publish(LinkEvent::Connected { link: addr });

        let link = ExchangeLink::spawn_with_driver(
            reader,
            driver,
            LinkContext {
                addr,
                events: Arc::clone(&self.events),
                data_trace: Arc::clone(&self.data_trace),
                read_buffer_size: Arc::clone(&self.read_buffer_size),
            },
        );
        Some(link)
    }

    /// Tears one connection down and publishes its disconnect event.
    ///
    /// The link drains all queued bytes first, so every data event precedes
    /// the disconnect event.
    async fn teardown(&self, link: ExchangeLink<OwnedWriteHalf>) {
        let addr = link.addr();
        *self.driver.lock().expect("lock poisoned") = None;
        self.connected.store(false, Ordering::SeqCst);
        link.shutdown().await;
        info!("disconnected: {addr}");
        self.events.publish(LinkEvent::Disconnected { link: addr });
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::StaticProbe;

    fn quick_config() -> ClientConfig {
        ClientConfig {
            poll_interval: Duration::from_millis(20),
            connect_interval: Duration::from_millis(20),
            ..ClientConfig::default()
        }
    }

    fn spawn_client() -> Arc<ExchangeClient> {
        ExchangeClient::spawn_with_probe(quick_config(), Arc::new(StaticProbe(true)))
    }

    #[tokio::test]
    async fn test_new_client_is_stopped_and_disconnected() {
        let client = spawn_client();

        assert!(!client.is_started());
        assert!(!client.is_connected());
        assert_eq!(client.remote_endpoint(), None);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_publishes_one_started_event_and_sets_target() {
        let client = spawn_client();
        let mut rx = client.subscribe();
        let target: SocketAddr = "127.0.0.1:4444".parse().unwrap();

        client.start(target);
        client.start(target); // idempotent beyond the target overwrite

        assert!(client.is_started());
        assert_eq!(client.remote_endpoint(), Some(target));
        assert_eq!(rx.try_recv(), Ok(LinkEvent::Started));
        // Anything further must not be a second Started.
        while let Ok(event) = rx.try_recv() {
            assert_ne!(event, LinkEvent::Started, "Started must fire once");
        }

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_without_start_publishes_nothing() {
        let client = spawn_client();
        let mut rx = client.subscribe();

        client.stop();

        assert!(!client.is_started());
        assert!(rx.try_recv().is_err());

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_clears_target_and_publishes_one_stopped_event() {
        let client = spawn_client();
        let mut rx = client.subscribe();

        client.start("127.0.0.1:4444".parse().unwrap());
        client.stop();
        client.stop();

        assert!(!client.is_started());
        assert_eq!(client.remote_endpoint(), None);
        let mut stopped = 0;
        while let Ok(event) = rx.try_recv() {
            if event == LinkEvent::Stopped {
                stopped += 1;
            }
        }
        assert_eq!(stopped, 1, "Stopped must fire exactly once");

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_send_data_while_disconnected_returns_false() {
        let client = spawn_client();

        assert!(!client.send_data(b"nope").await);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_data_trace_flag_round_trips() {
        let client = spawn_client();

        assert!(!client.data_trace());
        client.set_data_trace(true);
        assert!(client.data_trace());

        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_poll_fail_limit_is_clamped_to_one() {
        let client = spawn_client();

        client.set_poll_fail_limit(0);

        // The clamp is internal; the observable contract is that the client
        // survives the call and keeps running.
        assert!(!client.is_started());
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_is_safe_when_already_stopped() {
        let client = spawn_client();

        client.shutdown().await;
        client.shutdown().await;
    }
}
