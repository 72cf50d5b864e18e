//! # bytelink-core
//!
//! Shared foundation for the bytelink exchange layer, used by both the
//! client (`bytelink-client`) and the server (`bytelink-server`).
//!
//! This crate never binds, connects, or accepts a socket.  Everything here is
//! generic over [`tokio::io::AsyncRead`] / [`tokio::io::AsyncWrite`], so the
//! same pipeline that runs over TCP halves in production runs over in-memory
//! duplex pipes in tests.
//!
//! The crate defines:
//!
//! - **`addr`** – Connection identity.  Every live connection is named by its
//!   [`LinkAddr`], the (local, remote) endpoint pair; server sessions are
//!   keyed by it and every event carries it.
//!
//! - **`event`** – What the layer tells the outside world.  All lifecycle and
//!   data notifications are [`LinkEvent`] values published on an [`EventBus`]
//!   that fans them out to any number of subscribers, in order, without loss.
//!
//! - **`driver`** – The [`ExchangeDriver`]: the seam between raw wire bytes
//!   and events.  It owns the write half of a transport and re-emits received
//!   bytes one at a time as data events, with optional trace mirroring.
//!
//! - **`link`** – The [`ExchangeLink`]: the pair of background tasks (read
//!   and dispatch) that every live connection runs, plus the byte queue
//!   between them.  The client wraps a link in reconnect logic; a server
//!   session is a link without it.
//!
//! - **`error`** – Classification of I/O errors into "the connection is
//!   gone" versus "report and keep looping".

pub mod addr;
pub mod driver;
pub mod error;
pub mod event;
pub mod link;

pub use addr::LinkAddr;
pub use driver::ExchangeDriver;
pub use error::is_disconnect_error;
pub use event::{EventBus, LinkEvent, Subscription};
pub use link::{ExchangeLink, LinkContext};
