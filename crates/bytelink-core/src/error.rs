//! I/O error classification.
//!
//! The read and write paths need to tell two situations apart: the peer or
//! the network is gone (an ordinary disconnect, absorbed silently by the
//! teardown path), and everything else (surfaced as a recoverable-error
//! event while the owning loop keeps running).  The distinction lives here
//! so the client, the server sessions, and the driver all classify the same
//! way.

use std::io;

/// Returns `true` when `err` means the connection itself is dead, as opposed
/// to a one-off failure of the operation that produced it.
///
/// Covers the reset/abort/refused family, broken pipes, timeouts, and end of
/// stream.  Anything else (permission errors, invalid input, out of
/// descriptors, ...) is not a disconnect and is reported to subscribers
/// instead.
pub fn is_disconnect_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof
            | io::ErrorKind::TimedOut
            | io::ErrorKind::NotConnected
    )
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_gone_kinds_are_disconnects() {
        let kinds = [
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::ConnectionRefused,
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::UnexpectedEof,
            io::ErrorKind::TimedOut,
            io::ErrorKind::NotConnected,
        ];

        for kind in kinds {
            let err = io::Error::new(kind, "peer gone");
            assert!(
                is_disconnect_error(&err),
                "{kind:?} must classify as a disconnect"
            );
        }
    }

    #[test]
    fn test_other_kinds_are_not_disconnects() {
        let kinds = [
            io::ErrorKind::PermissionDenied,
            io::ErrorKind::InvalidData,
            io::ErrorKind::WouldBlock,
            io::ErrorKind::Interrupted,
            io::ErrorKind::Other,
        ];

        for kind in kinds {
            let err = io::Error::new(kind, "incidental");
            assert!(
                !is_disconnect_error(&err),
                "{kind:?} must not classify as a disconnect"
            );
        }
    }
}
