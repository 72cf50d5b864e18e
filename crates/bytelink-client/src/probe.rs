//! Out-of-band liveness probing.
//!
//! TCP alone cannot tell a silent peer from an idle one: a machine that loses
//! power mid-connection leaves the socket looking healthy until the next
//! write.  The client therefore periodically asks a [`LivenessProbe`] whether
//! the peer's *address* still answers, independent of the connection itself.
//!
//! Classic ICMP echo needs a raw socket, which requires elevated privileges
//! on every platform this runs on, so the probe is a trait with unprivileged
//! implementations:
//!
//! - [`UdpProbe`] (default) sends a datagram to a high, almost certainly
//!   closed UDP port.  A live host answers with ICMP port-unreachable, which
//!   the OS surfaces on a connected UDP socket as `ConnectionRefused` — proof
//!   enough that the host is up.  So is any actual datagram in reply.
//! - [`TcpProbe`] opens and immediately drops a TCP connection, for targets
//!   whose firewalls swallow ICMP.  A refused connection still counts as
//!   alive: the refusal itself came from the host.
//! - [`StaticProbe`] answers with a preset value, for wiring and tests.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;
use tracing::debug;

/// UDP port the default probe targets.  Deliberately high and unassigned so
/// the common answer is ICMP port-unreachable rather than an actual service.
const PROBE_PORT: u16 = 47_901;

/// Payload carried by probe datagrams.  Content is irrelevant; it only has
/// to reach the peer's network stack.
const PROBE_PAYLOAD: &[u8] = b"bytelink-probe";

/// A reachability check for one address.
///
/// Implementations must answer within their own timeout; the caller treats
/// `probe` as a single bounded operation.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    /// Returns `true` if `addr` answered within the probe's timeout.
    async fn probe(&self, addr: IpAddr) -> bool;
}

// ── UDP probe ─────────────────────────────────────────────────────────────────

/// Default probe: UDP datagram to a closed port, counting ICMP
/// port-unreachable as a sign of life.  Needs no privileges.
pub struct UdpProbe {
    timeout: Duration,
}

impl UdpProbe {
    /// Creates a probe that waits `timeout` for an answer.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl LivenessProbe for UdpProbe {
    async fn probe(&self, addr: IpAddr) -> bool {
        let bind_addr: SocketAddr = if addr.is_ipv4() {
            "0.0.0.0:0".parse().expect("static addr")
        } else {
            "[::]:0".parse().expect("static addr")
        };

        let socket = match UdpSocket::bind(bind_addr).await {
            Ok(s) => s,
            Err(e) => {
                debug!("probe socket bind failed: {e}");
                return false;
            }
        };

        let target = SocketAddr::new(addr, PROBE_PORT);
        if let Err(e) = socket.connect(target).await {
            debug!("probe connect to {target} failed: {e}");
            return false;
        }
        if let Err(e) = socket.send(PROBE_PAYLOAD).await {
            // An unreachable network shows up here already.
            debug!("probe send to {target} failed: {e}");
            return e.kind() == std::io::ErrorKind::ConnectionRefused;
        }

        let mut buf = [0u8; 64];
        match timeout(self.timeout, socket.recv(&mut buf)).await {
            // Any datagram back means the host is up.
            Ok(Ok(_)) => true,
            // ICMP port-unreachable from the host: also up.
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => true,
            Ok(Err(e)) => {
                debug!("probe recv from {target} failed: {e}");
                false
            }
            // Silence within the timeout: treated as dead.
            Err(_) => false,
        }
    }
}

// ── TCP probe ─────────────────────────────────────────────────────────────────

/// Fallback probe: open-and-drop TCP connection to a configurable port.
///
/// Point it at a port the peer is known to answer or refuse on — not at a
/// bytelink server's own listener, which would churn its accept loop.
pub struct TcpProbe {
    port: u16,
    timeout: Duration,
}

impl TcpProbe {
    /// Creates a probe against `port` with the given answer `timeout`.
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self { port, timeout }
    }
}

#[async_trait]
impl LivenessProbe for TcpProbe {
    async fn probe(&self, addr: IpAddr) -> bool {
        let target = SocketAddr::new(addr, self.port);
        match timeout(self.timeout, TcpStream::connect(target)).await {
            Ok(Ok(stream)) => {
                drop(stream);
                true
            }
            // A refusal or reset is still an answer from the host.
            Ok(Err(e)) => matches!(
                e.kind(),
                std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::ConnectionReset
            ),
            Err(_) => false,
        }
    }
}

// ── Static probe ──────────────────────────────────────────────────────────────

/// Probe that always answers with a fixed value.
pub struct StaticProbe(pub bool);

#[async_trait]
impl LivenessProbe for StaticProbe {
    async fn probe(&self, _addr: IpAddr) -> bool {
        self.0
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_probe_returns_its_preset_value() {
        let up = StaticProbe(true);
        let down = StaticProbe(false);

        assert!(up.probe("127.0.0.1".parse().unwrap()).await);
        assert!(!down.probe("127.0.0.1".parse().unwrap()).await);
    }

    #[tokio::test]
    async fn test_mock_probe_can_script_answers() {
        // Arrange – mockall generates MockLivenessProbe from the trait
        let mut probe = MockLivenessProbe::new();
        probe.expect_probe().times(2).returning(|_| false);

        // Act / Assert
        assert!(!probe.probe("10.0.0.1".parse().unwrap()).await);
        assert!(!probe.probe("10.0.0.1".parse().unwrap()).await);
    }

    #[tokio::test]
    async fn test_udp_probe_counts_port_unreachable_as_alive() {
        let probe = UdpProbe::new(Duration::from_millis(500));

        // Loopback always answers: nothing listens on the probe port, so the
        // kernel generates port-unreachable, surfaced as ConnectionRefused.
        assert!(probe.probe("127.0.0.1".parse().unwrap()).await);
    }

    #[tokio::test]
    async fn test_udp_probe_times_out_on_silent_address() {
        // 192.0.2.0/24 is TEST-NET-1: guaranteed unrouted, so the probe
        // hears nothing and must report dead at its timeout.
        let probe = UdpProbe::new(Duration::from_millis(100));

        assert!(!probe.probe("192.0.2.1".parse().unwrap()).await);
    }

    #[tokio::test]
    async fn test_tcp_probe_counts_open_port_as_alive() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let probe = TcpProbe::new(port, Duration::from_millis(500));

        assert!(probe.probe("127.0.0.1".parse().unwrap()).await);
    }

    #[tokio::test]
    async fn test_tcp_probe_counts_refused_port_as_alive() {
        // Reserve a port, then close it so nothing listens there.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let probe = TcpProbe::new(port, Duration::from_millis(500));

        assert!(
            probe.probe("127.0.0.1".parse().unwrap()).await,
            "a refused connection is still an answer from the host"
        );
    }

    #[tokio::test]
    async fn test_tcp_probe_times_out_on_silent_address() {
        let probe = TcpProbe::new(80, Duration::from_millis(100));

        assert!(!probe.probe("192.0.2.1".parse().unwrap()).await);
    }
}
