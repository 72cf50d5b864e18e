//! bytelink-client — reconnect-forever line pipe.
//!
//! Connects to a bytelink (or any raw TCP) endpoint, forwards stdin lines to
//! the peer, and prints received bytes to stdout.  The connection is
//! supervised: if the peer goes away the tool keeps retrying until Ctrl-C.
//!
//! # Usage
//!
//! ```text
//! bytelink-client [OPTIONS]
//!
//! Options:
//!   --host <HOST>                Target hostname or IP [default: 127.0.0.1]
//!   --port <PORT>                Target TCP port [default: 4444]
//!   --connect-interval-ms <MS>   Pause between connect attempts [default: 1000]
//!   --poll-interval-ms <MS>      Pause between liveness probes [default: 1000]
//!   --poll-fail-limit <N>        Probe failures that force a disconnect [default: 3]
//!   --read-buffer-size <BYTES>   Socket read chunk size [default: 1024]
//!   --trace                      Mirror every sent/received byte as a trace log line
//! ```
//!
//! Log verbosity is controlled by `RUST_LOG` (default `info`).

use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use bytelink_client::{ClientConfig, ExchangeClient};
use bytelink_core::LinkEvent;

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Resilient TCP pipe: stdin to the peer, peer bytes to stdout.
#[derive(Debug, Parser)]
#[command(
    name = "bytelink-client",
    about = "Reconnecting TCP exchange client with liveness polling",
    version
)]
struct Cli {
    /// Target hostname or IP address.
    #[arg(long, default_value = "127.0.0.1", env = "BYTELINK_HOST")]
    host: String,

    /// Target TCP port.
    #[arg(long, default_value_t = 4444, env = "BYTELINK_PORT")]
    port: u16,

    /// Pause between connection attempts, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    connect_interval_ms: u64,

    /// Pause between liveness probes while connected, in milliseconds.
    #[arg(long, default_value_t = 1000)]
    poll_interval_ms: u64,

    /// Consecutive probe failures that force a disconnect.
    #[arg(long, default_value_t = 3)]
    poll_fail_limit: u32,

    /// Bytes read from the socket per read call.
    #[arg(long, default_value_t = 1024)]
    read_buffer_size: usize,

    /// Emit a trace log line for every byte sent or received.
    #[arg(long)]
    trace: bool,
}

impl Cli {
    /// Resolves the target endpoint from `--host` and `--port`.
    fn target(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid target address: '{}:{}'", self.host, self.port))
    }

    fn client_config(&self) -> ClientConfig {
        ClientConfig {
            poll_fail_limit: self.poll_fail_limit,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            connect_interval: Duration::from_millis(self.connect_interval_ms),
            read_buffer_size: self.read_buffer_size,
            ..ClientConfig::default()
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let target = cli.target()?;

    let client = ExchangeClient::spawn(cli.client_config());
    client.set_data_trace(cli.trace);
    let mut events = client.subscribe();

    info!("bytelink client starting toward {target}");
    client.start(target);

    // Stdin → peer.  Each line is sent with its newline restored so the far
    // side sees the same byte stream that was typed.
    let sender = Arc::clone(&client);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let mut payload = line.into_bytes();
            payload.push(b'\n');
            if !sender.send_data(&payload).await {
                warn!("not connected; line dropped");
            }
        }
    });

    // Peer → stdout, plus lifecycle logging.
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            event = events.recv() => match event {
                Some(event) => handle_event(event),
                None => break,
            }
        }
    }

    client.shutdown().await;
    info!("bytelink client stopped");
    Ok(())
}

/// Routes one event: data to stdout, lifecycle to the log.
fn handle_event(event: LinkEvent) {
    match event {
        LinkEvent::DataReceived { data, .. } => {
            let mut out = std::io::stdout();
            let _ = out.write_all(&data);
            let _ = out.flush();
        }
        LinkEvent::Connected { link } => info!("connected: {link}"),
        LinkEvent::Disconnected { link } => info!("disconnected: {link}"),
        LinkEvent::ConnectionFailed { reason } => warn!("{reason}"),
        LinkEvent::Reconnecting => debug!("attempting connection"),
        LinkEvent::SendTrace { data, link } => debug!("tx {link}: {data:02x?}"),
        LinkEvent::ReceiveTrace { data, link } => debug!("rx {link}: {data:02x?}"),
        LinkEvent::RecoverableError { detail } => warn!("{detail}"),
        LinkEvent::Started | LinkEvent::Stopped | LinkEvent::Listening { .. } => {}
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
