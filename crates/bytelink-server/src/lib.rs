//! bytelink-server library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! The server side of the bytelink exchange layer accepts connections on any
//! number of configured local endpoints at once:
//!
//! 1. [`ExchangeServer::start`] binds one listener per
//!    [`ListenerConfig`], announcing each with a listening event before the
//!    call returns; every listener then runs its own accept loop.
//! 2. Each accepted connection becomes a session, keyed in a shared registry
//!    by its (local, remote) endpoint pair.  A listener whose endpoint is at
//!    its `max_clients` cap rejects further connections by closing them
//!    immediately after accept, with no event.
//! 3. Received bytes flow through the shared `bytelink-core` pipeline and
//!    surface as per-byte data events; [`ExchangeServer::write`] routes
//!    outbound bytes to one session by its endpoint pair.
//!
//! Collaborators observe everything through [`ExchangeServer::subscribe`].

/// Listener configuration and the daemon's TOML config file.
pub mod config;

/// The listener set, session registry, and write routing.
pub mod server;

/// One accepted connection's lifecycle.
pub mod session;

pub use config::{load_daemon_config, ConfigError, DaemonConfig, ListenerConfig, ListenerEntry};
pub use server::{ExchangeServer, ServerError};
