//! Configuration for the exchange client.

use std::time::Duration;

/// Tuning knobs for [`ExchangeClient`](crate::client::ExchangeClient).
///
/// Every knob can also be adjusted on a running client; the background loops
/// pick the new value up on their next iteration.  The values here only seed
/// the initial state.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Consecutive liveness-probe failures that force a disconnect.
    /// Clamped to a minimum of 1.
    pub poll_fail_limit: u32,
    /// Pause between liveness probes while connected.
    pub poll_interval: Duration,
    /// Pause between connection attempts while disconnected.
    pub connect_interval: Duration,
    /// Bytes read from the socket per read call.
    pub read_buffer_size: usize,
    /// How long one liveness probe waits for an answer.
    pub probe_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            poll_fail_limit: 3,
            poll_interval: Duration::from_millis(1000),
            connect_interval: Duration::from_millis(1000),
            read_buffer_size: 1024,
            probe_timeout: Duration::from_millis(500),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_poll_fail_limit_is_three() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.poll_fail_limit, 3);
    }

    #[test]
    fn test_default_intervals_are_one_second() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.poll_interval, Duration::from_millis(1000));
        assert_eq!(cfg.connect_interval, Duration::from_millis(1000));
    }

    #[test]
    fn test_default_read_buffer_is_one_kilobyte() {
        let cfg = ClientConfig::default();
        assert_eq!(cfg.read_buffer_size, 1024);
    }
}
