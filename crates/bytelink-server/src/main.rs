//! bytelink-server — multi-endpoint TCP exchange daemon.
//!
//! Reads its listener set from a TOML config file, binds each endpoint, and
//! serves sessions until Ctrl-C.  With `--echo` (or `echo = true` in the
//! config) every received byte is written straight back to the session it
//! came from, which makes the daemon a convenient far end for exercising a
//! client.
//!
//! # Usage
//!
//! ```text
//! bytelink-server [OPTIONS]
//!
//! Options:
//!   --config <PATH>   Config file [default: /etc/bytelink/config.toml]
//!   --echo            Write received bytes back to their session
//!   --trace           Mirror every sent/received byte as a trace log line
//! ```
//!
//! A missing config file is not an error: the daemon falls back to one
//! listener on `0.0.0.0:4444` with a cap of 16.  `RUST_LOG` overrides the
//! config file's `log_level`.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use bytelink_core::LinkEvent;
use bytelink_server::{load_daemon_config, DaemonConfig, ExchangeServer};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Multi-endpoint TCP exchange daemon.
#[derive(Debug, Parser)]
#[command(
    name = "bytelink-server",
    about = "Multi-endpoint TCP exchange server with per-endpoint session caps",
    version
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(
        long,
        default_value = "/etc/bytelink/config.toml",
        env = "BYTELINK_CONFIG"
    )]
    config: PathBuf,

    /// Write every received byte back to the session it arrived on.
    #[arg(long)]
    echo: bool,

    /// Emit a trace log line for every byte sent or received.
    #[arg(long)]
    trace: bool,
}

impl Cli {
    /// Loads the config file and folds the CLI overrides into it.
    fn effective_config(&self) -> anyhow::Result<DaemonConfig> {
        let mut config = load_daemon_config(&self.config)
            .with_context(|| format!("loading config from {}", self.config.display()))?;
        config.echo |= self.echo;
        config.data_trace |= self.trace;
        Ok(config)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.effective_config()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .init();

    let server = ExchangeServer::new();
    server.set_data_trace(config.data_trace);
    let mut events = server.subscribe();

    let listeners = config
        .listeners
        .iter()
        .map(|entry| entry.to_listener_config())
        .collect();
    server
        .start(listeners)
        .await
        .context("starting exchange server")?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            event = events.recv() => match event {
                Some(event) => handle_event(&server, event, config.echo).await,
                None => break,
            }
        }
    }

    server.shutdown().await;
    info!("bytelink server stopped");
    Ok(())
}

/// Routes one event: received data back to its session when echoing,
/// lifecycle to the log.
async fn handle_event(server: &ExchangeServer, event: LinkEvent, echo: bool) {
    match event {
        LinkEvent::DataReceived { data, link } => {
            if echo && !server.write(&data, link.remote, link.local).await {
                warn!("echo to {link} failed");
            }
        }
        LinkEvent::Listening { endpoint } => info!("listening on {endpoint}"),
        LinkEvent::Connected { link } => info!("session opened: {link}"),
        LinkEvent::Disconnected { link } => info!("session closed: {link}"),
        LinkEvent::SendTrace { data, link } => debug!("tx {link}: {data:02x?}"),
        LinkEvent::ReceiveTrace { data, link } => debug!("rx {link}: {data:02x?}"),
        LinkEvent::RecoverableError { detail } => warn!("{detail}"),
        LinkEvent::Started
        | LinkEvent::Stopped
        | LinkEvent::Reconnecting
        | LinkEvent::ConnectionFailed { .. } => {}
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
