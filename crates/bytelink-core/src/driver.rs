//! The exchange driver: send primitive plus per-byte event re-emission.
//!
//! One driver exists per connection.  It owns the write half of the
//! transport behind an async lock, so any task can send, and it is the only
//! place that turns received bytes into [`LinkEvent`]s.  The driver never
//! touches the read half; the connection's dispatch loop feeds it one byte
//! at a time through [`ExchangeDriver::on_byte_received`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::debug;

use crate::addr::LinkAddr;
use crate::error::is_disconnect_error;
use crate::event::{EventBus, LinkEvent};

/// Send primitive and event re-emitter for one connection.
///
/// Generic over the write half so production code can hand it a TCP half
/// and tests an in-memory pipe.
pub struct ExchangeDriver<W> {
    link: LinkAddr,
    writer: Mutex<Option<W>>,
    events: Arc<EventBus>,
    trace: Arc<AtomicBool>,
}

impl<W: AsyncWrite + Unpin> ExchangeDriver<W> {
    /// Creates a driver over an attached write half.
    ///
    /// `trace` is shared with the owner and read on every operation, so
    /// flipping it mid-connection affects the very next send or receive.
    pub fn new(writer: W, link: LinkAddr, events: Arc<EventBus>, trace: Arc<AtomicBool>) -> Self {
        Self {
            link,
            writer: Mutex::new(Some(writer)),
            events,
            trace,
        }
    }

    /// Writes all of `data` to the transport.
    ///
    /// Returns `false`, with no partial-success indication, when the write
    /// half is detached or the write fails.  A failure that means the peer
    /// is gone stays silent (teardown reports the disconnect); any other
    /// failure raises a recoverable-error event.  On success, raises one
    /// send-trace event carrying `data` when tracing is enabled.
    pub async fn send(&self, data: &[u8]) -> bool {
        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return false;
        };

        if let Err(e) = writer.write_all(data).await {
            return self.write_failed(e);
        }
        if let Err(e) = writer.flush().await {
            return self.write_failed(e);
        }

        if self.trace.load(Ordering::Relaxed) {
            self.events.publish(LinkEvent::SendTrace {
                data: data.to_vec(),
                link: self.link,
            });
        }
        true
    }

    /// Re-emits one received byte as events.
    ///
    /// Called by the dispatch loop in strict receive order.  Raises a
    /// receive-trace event first when tracing is enabled, then the
    /// data-received event, both carrying this connection's endpoint pair.
    pub fn on_byte_received(&self, byte: u8) {
        if self.trace.load(Ordering::Relaxed) {
            self.events.publish(LinkEvent::ReceiveTrace {
                data: vec![byte],
                link: self.link,
            });
        }
        self.events.publish(LinkEvent::DataReceived {
            data: vec![byte],
            link: self.link,
        });
    }

    /// The endpoint pair this driver serves.
    pub fn link(&self) -> LinkAddr {
        self.link
    }

    /// Whether a write half is still attached.
    pub async fn is_attached(&self) -> bool {
        self.writer.lock().await.is_some()
    }

    /// Detaches and shuts down the write half.
    ///
    /// Signals end-of-stream to the peer.  Subsequent [`send`] calls return
    /// `false`.  Safe to call more than once.
    ///
    /// [`send`]: ExchangeDriver::send
    pub async fn detach(&self) {
        let taken = self.writer.lock().await.take();
        if let Some(mut writer) = taken {
            // The peer may already be gone; nothing to do about it here.
            let _ = writer.shutdown().await;
            debug!("write half detached for {}", self.link);
        }
    }

    fn write_failed(&self, e: std::io::Error) -> bool {
        if !is_disconnect_error(&e) {
            self.events.publish(LinkEvent::RecoverableError {
                detail: format!("send on {} failed: {e}", self.link),
            });
        }
        false
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn link() -> LinkAddr {
        LinkAddr::new(
            "127.0.0.1:4444".parse().unwrap(),
            "127.0.0.1:50000".parse().unwrap(),
        )
    }

    fn make_driver(
        writer: tokio::io::DuplexStream,
    ) -> (
        ExchangeDriver<tokio::io::DuplexStream>,
        crate::event::Subscription,
        Arc<AtomicBool>,
    ) {
        let events = Arc::new(EventBus::new());
        let rx = events.subscribe();
        let trace = Arc::new(AtomicBool::new(false));
        let driver = ExchangeDriver::new(writer, link(), events, Arc::clone(&trace));
        (driver, rx, trace)
    }

    #[tokio::test]
    async fn test_send_writes_all_bytes_through() {
        // Arrange
        let (near, mut far) = tokio::io::duplex(64);
        let (driver, _rx, _trace) = make_driver(near);

        // Act
        let ok = driver.send(&[0x01, 0x02, 0x03, 0x04]).await;

        // Assert
        assert!(ok);
        let mut buf = [0u8; 4];
        far.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0x01, 0x02, 0x03, 0x04]);
    }

    #[tokio::test]
    async fn test_send_after_detach_returns_false() {
        let (near, _far) = tokio::io::duplex(64);
        let (driver, mut rx, _trace) = make_driver(near);

        driver.detach().await;

        assert!(!driver.send(b"late").await);
        assert!(!driver.is_attached().await);
        assert!(rx.try_recv().is_err(), "a detached send must stay silent");
    }

    #[tokio::test]
    async fn test_send_to_dead_peer_fails_silently() {
        let (near, far) = tokio::io::duplex(64);
        let (driver, mut rx, _trace) = make_driver(near);
        drop(far);

        let ok = driver.send(b"x").await;

        // A broken pipe is a disconnect, not a recoverable error.
        assert!(!ok);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_trace_follows_successful_write_only_when_enabled() {
        let (near, _far) = tokio::io::duplex(64);
        let (driver, mut rx, trace) = make_driver(near);

        assert!(driver.send(b"quiet").await);
        assert!(rx.try_recv().is_err(), "tracing off must emit nothing");

        trace.store(true, Ordering::Relaxed);
        assert!(driver.send(b"loud").await);

        assert_eq!(
            rx.try_recv(),
            Ok(LinkEvent::SendTrace {
                data: b"loud".to_vec(),
                link: link(),
            })
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_on_byte_received_emits_trace_before_data() {
        let (near, _far) = tokio::io::duplex(64);
        let (driver, mut rx, trace) = make_driver(near);
        trace.store(true, Ordering::Relaxed);

        driver.on_byte_received(0xAB);

        assert_eq!(
            rx.try_recv(),
            Ok(LinkEvent::ReceiveTrace {
                data: vec![0xAB],
                link: link(),
            })
        );
        assert_eq!(
            rx.try_recv(),
            Ok(LinkEvent::DataReceived {
                data: vec![0xAB],
                link: link(),
            })
        );
    }

    #[tokio::test]
    async fn test_on_byte_received_without_trace_emits_data_only() {
        let (near, _far) = tokio::io::duplex(64);
        let (driver, mut rx, _trace) = make_driver(near);

        driver.on_byte_received(0x10);
        driver.on_byte_received(0x20);

        assert_eq!(
            rx.try_recv(),
            Ok(LinkEvent::DataReceived {
                data: vec![0x10],
                link: link(),
            })
        );
        assert_eq!(
            rx.try_recv(),
            Ok(LinkEvent::DataReceived {
                data: vec![0x20],
                link: link(),
            })
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_detach_is_idempotent() {
        let (near, _far) = tokio::io::duplex(64);
        let (driver, _rx, _trace) = make_driver(near);

        tokio_test::block_on(async {
            driver.detach().await;
            driver.detach().await;
            assert!(!driver.is_attached().await);
        });
    }
}
