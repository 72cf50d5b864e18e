//! Connection addressing.
//!
//! A live TCP connection is identified by the pair of endpoints it runs
//! between.  [`LinkAddr`] is that pair: it keys the server's session registry
//! and tags every per-connection event, so subscribers can tell apart traffic
//! from many concurrent peers.

use std::fmt;
use std::net::SocketAddr;

/// Identity of one connection: its (local, remote) endpoint pair.
///
/// The pair is fixed for the lifetime of the connection.  Two connections
/// between the same machines still differ in the remote ephemeral port, so a
/// `LinkAddr` never names more than one live connection at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkAddr {
    /// Endpoint on this machine.
    pub local: SocketAddr,
    /// Endpoint on the peer.
    pub remote: SocketAddr,
}

impl LinkAddr {
    /// Creates a `LinkAddr` from the local and remote endpoints.
    pub fn new(local: SocketAddr, remote: SocketAddr) -> Self {
        Self { local, remote }
    }
}

impl fmt::Display for LinkAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.local, self.remote)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_link_addr_equality_covers_both_endpoints() {
        let a = LinkAddr::new(addr("127.0.0.1:4444"), addr("127.0.0.1:50000"));
        let b = LinkAddr::new(addr("127.0.0.1:4444"), addr("127.0.0.1:50000"));
        let c = LinkAddr::new(addr("127.0.0.1:4444"), addr("127.0.0.1:50001"));

        assert_eq!(a, b);
        assert_ne!(a, c, "a different remote port must give a different identity");
    }

    #[test]
    fn test_link_addr_works_as_registry_key() {
        // Arrange
        let key = LinkAddr::new(addr("127.0.0.1:4444"), addr("127.0.0.1:50000"));
        let mut registry = HashMap::new();

        // Act
        registry.insert(key, "session");

        // Assert – an equal key constructed separately finds the entry
        let lookup = LinkAddr::new(addr("127.0.0.1:4444"), addr("127.0.0.1:50000"));
        assert_eq!(registry.get(&lookup), Some(&"session"));
    }

    #[test]
    fn test_link_addr_display_shows_both_sides() {
        let link = LinkAddr::new(addr("10.0.0.1:80"), addr("10.0.0.2:51234"));
        let text = link.to_string();

        assert!(text.contains("10.0.0.1:80"));
        assert!(text.contains("10.0.0.2:51234"));
    }
}
