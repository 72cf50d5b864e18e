//! bytelink-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! The client side of the bytelink exchange layer maintains exactly one
//! outbound TCP connection:
//!
//! 1. [`ExchangeClient::start`] records the target endpoint; a background
//!    supervisor connects to it and reconnects forever on failure.
//! 2. While connected, the supervisor polls the peer with an out-of-band
//!    [`LivenessProbe`]; enough consecutive probe failures force a disconnect
//!    even when TCP still looks healthy.
//! 3. Received bytes flow through the shared `bytelink-core` pipeline and
//!    surface as per-byte data events; [`ExchangeClient::send_data`] moves
//!    bytes the other way.
//!
//! Collaborators observe everything through [`ExchangeClient::subscribe`].

/// Client configuration knobs and their defaults.
pub mod config;

/// The reconnecting connection supervisor.
pub mod client;

/// Pluggable out-of-band reachability probing.
pub mod probe;

pub use client::ExchangeClient;
pub use config::ClientConfig;
pub use probe::{LivenessProbe, StaticProbe, TcpProbe, UdpProbe};
