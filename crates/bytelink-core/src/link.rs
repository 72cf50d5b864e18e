//! Per-connection exchange pipeline.
//!
//! An [`ExchangeLink`] bundles the two background tasks every live
//! connection runs, no matter which side created it:
//!
//! 1. **Read task** – pulls bytes off the transport in chunks of up to the
//!    configured buffer size and pushes them, in order, onto the byte queue.
//! 2. **Dispatch task** – pops exactly one byte at a time off the queue and
//!    hands it to the [`ExchangeDriver`], the sole place data events are
//!    raised.
//!
//! The byte queue is an unbounded channel: a burst of arrivals is absorbed
//! without stalling the socket while delivery stays strictly in order and
//! byte-at-a-time.  When the transport dies or the link is halted, the read
//! task closes the queue; the dispatch task then drains whatever is left
//! before finishing, so every byte received ahead of a disconnect is
//! delivered ahead of the disconnect notification.
//!
//! The link itself raises no lifecycle events.  Its owner (the client
//! supervisor or a server session) publishes `Connected` before spawning it
//! and `Disconnected` after [`ExchangeLink::shutdown`] returns, which keeps
//! the per-connection event ordering guarantee in one place.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::addr::LinkAddr;
use crate::driver::ExchangeDriver;
use crate::error::is_disconnect_error;
use crate::event::{EventBus, LinkEvent};

/// Shared pieces a link needs from its owner.
///
/// `data_trace` and `read_buffer_size` stay owned by the client or server so
/// one flag/knob covers every connection it manages; the link re-reads them
/// on each operation.
pub struct LinkContext {
    /// Endpoint pair of the connection this link drives.
    pub addr: LinkAddr,
    /// Bus all events are published on.
    pub events: Arc<EventBus>,
    /// Trace flag, read at each send/receive.
    pub data_trace: Arc<AtomicBool>,
    /// Read chunk size in bytes, re-read before every read call.
    pub read_buffer_size: Arc<AtomicUsize>,
}

/// One live connection's pipeline: driver plus read and dispatch tasks.
pub struct ExchangeLink<W> {
    driver: Arc<ExchangeDriver<W>>,
    addr: LinkAddr,
    halt: Arc<Notify>,
    closed: watch::Receiver<bool>,
    read_task: JoinHandle<()>,
    dispatch_task: JoinHandle<()>,
}

impl<W: AsyncWrite + Unpin + Send + 'static> ExchangeLink<W> {
    /// Spawns the read and dispatch tasks over a transport's two halves.
    ///
    /// Must be called from within a Tokio runtime.  The caller publishes the
    /// connect event for `ctx.addr` before calling this, so no data event
    /// can ever precede it.
    pub fn spawn<R>(reader: R, writer: W, ctx: LinkContext) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let driver = Arc::new(ExchangeDriver::new(
            writer,
            ctx.addr,
            Arc::clone(&ctx.events),
            Arc::clone(&ctx.data_trace),
        ));
        Self::spawn_with_driver(reader, driver, ctx)
    }

    /// Like [`spawn`], but over a driver the caller built beforehand.
    ///
    /// Lets an owner hand the send handle out (registry entry, client send
    /// slot) and publish its connect event before any pipeline task exists,
    /// so neither a send nor a data event can slip ahead of it.
    ///
    /// [`spawn`]: ExchangeLink::spawn
    pub fn spawn_with_driver<R>(reader: R, driver: Arc<ExchangeDriver<W>>, ctx: LinkContext) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let addr = ctx.addr;
        let (byte_tx, byte_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);
        let halt = Arc::new(Notify::new());

        let read_task = tokio::spawn(run_read_loop(
            reader,
            byte_tx,
            ctx,
            Arc::clone(&halt),
            closed_tx,
        ));
        let dispatch_task = tokio::spawn(run_dispatch_loop(byte_rx, Arc::clone(&driver)));

        Self {
            driver,
            addr,
            halt,
            closed: closed_rx,
            read_task,
            dispatch_task,
        }
    }

    /// Shared handle to this connection's driver, for routing sends.
    pub fn driver(&self) -> Arc<ExchangeDriver<W>> {
        Arc::clone(&self.driver)
    }

    /// Endpoint pair of this connection.
    pub fn addr(&self) -> LinkAddr {
        self.addr
    }

    /// Sends through this connection's driver.  See [`ExchangeDriver::send`].
    pub async fn send(&self, data: &[u8]) -> bool {
        self.driver.send(data).await
    }

    /// Resolves once the transport is gone: peer closed, connection error,
    /// or a halt.  Safe to await multiple times and from a `select!`.
    pub async fn closed(&self) {
        let mut rx = self.closed.clone();
        // An error here means the read task is already gone, which also
        // means the link is closed.
        let _ = rx.wait_for(|done| *done).await;
    }

    /// Halts the pipeline and waits for both tasks to finish.
    ///
    /// The dispatch task drains every queued byte before exiting, so all
    /// data events for this connection have been published when this
    /// returns.  The write half is then shut down and detached.
    pub async fn shutdown(self) {
        self.halt.notify_one();
        let _ = self.read_task.await;
        let _ = self.dispatch_task.await;
        self.driver.detach().await;
    }
}

async fn run_read_loop<R>(
    mut reader: R,
    byte_tx: mpsc::UnboundedSender<u8>,
    ctx: LinkContext,
    halt: Arc<Notify>,
    closed_tx: watch::Sender<bool>,
) where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; ctx.read_buffer_size.load(Ordering::Relaxed).max(1)];

    loop {
        // Pick up a resized buffer knob before the next read, never during one.
        let want = ctx.read_buffer_size.load(Ordering::Relaxed).max(1);
        if buf.len() != want {
            buf.resize(want, 0);
        }

        tokio::select! {
            _ = halt.notified() => {
                debug!("read loop halted for {}", ctx.addr);
                break;
            }
            result = reader.read(&mut buf) => match result {
                Ok(0) => {
                    debug!("peer closed {}", ctx.addr);
                    break;
                }
                Ok(n) => {
                    let mut queue_open = true;
                    for &byte in &buf[..n] {
                        if byte_tx.send(byte).is_err() {
                            queue_open = false;
                            break;
                        }
                    }
                    if !queue_open {
                        break;
                    }
                }
                Err(e) if is_disconnect_error(&e) => {
                    debug!("connection {} lost: {e}", ctx.addr);
                    break;
                }
                Err(e) => {
                    warn!("read error on {}: {e}", ctx.addr);
                    ctx.events.publish(LinkEvent::RecoverableError {
                        detail: format!("read on {} failed: {e}", ctx.addr),
                    });
                }
            }
        }
    }

    // Dropping byte_tx closes the queue; the dispatch loop drains and exits.
    let _ = closed_tx.send(true);
}

async fn run_dispatch_loop<W>(mut byte_rx: mpsc::UnboundedReceiver<u8>, driver: Arc<ExchangeDriver<W>>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(byte) = byte_rx.recv().await {
        driver.on_byte_received(byte);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
