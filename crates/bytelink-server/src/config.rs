//! Server configuration: the listener set for the library API, and the
//! TOML-backed daemon configuration for the `bytelink-server` binary.
//!
//! The daemon reads `/etc/bytelink/config.toml` (overridable with
//! `--config`).  A missing file is not an error: the daemon starts with
//! [`DaemonConfig::default`], which listens on one endpoint.  Every field
//! carries a serde default so old config files keep parsing as fields are
//! added.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for daemon configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

// ── Library-level listener configuration ──────────────────────────────────────

/// One local endpoint the server listens on, plus its connection cap.
///
/// Created at `start`, gone at `stop`.  `max_clients` counts concurrently
/// active sessions on this endpoint; the (max+1)-th connection is accepted
/// and immediately closed (see the accept loop in [`crate::server`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerConfig {
    /// Address and port to bind.
    pub endpoint: SocketAddr,
    /// Concurrent session cap for this endpoint; minimum 1.
    pub max_clients: usize,
}

impl ListenerConfig {
    /// Creates a listener config for `endpoint` capped at `max_clients`.
    pub fn new(endpoint: SocketAddr, max_clients: usize) -> Self {
        Self {
            endpoint,
            max_clients,
        }
    }
}

// ── Daemon configuration file schema ──────────────────────────────────────────

/// Top-level daemon configuration stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DaemonConfig {
    /// Endpoints to listen on.
    #[serde(default = "default_listeners")]
    pub listeners: Vec<ListenerEntry>,
    /// Mirror every sent/received byte as a trace event.
    #[serde(default)]
    pub data_trace: bool,
    /// Write every received byte back to its originating session.
    #[serde(default)]
    pub echo: bool,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// One `[[listeners]]` entry in the config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ListenerEntry {
    /// Address and port to bind, e.g. `"0.0.0.0:4444"`.
    pub endpoint: SocketAddr,
    /// Concurrent session cap for this endpoint.
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
}

impl ListenerEntry {
    /// Converts the file entry into the library's listener config.
    pub fn to_listener_config(&self) -> ListenerConfig {
        ListenerConfig::new(self.endpoint, self.max_clients)
    }
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_listeners() -> Vec<ListenerEntry> {
    vec![ListenerEntry {
        endpoint: "0.0.0.0:4444".parse().expect("static addr"),
        max_clients: default_max_clients(),
    }]
}
fn default_max_clients() -> usize {
    16
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listeners: default_listeners(),
            data_trace: false,
            echo: false,
            log_level: default_log_level(),
        }
    }
}

/// Loads the daemon config from `path`, returning `DaemonConfig::default()`
/// if the file does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not
/// found", and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_daemon_config(path: &Path) -> Result<DaemonConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let cfg: DaemonConfig = toml::from_str(&content)?;
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DaemonConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_daemon_config_has_one_listener() {
        let cfg = DaemonConfig::default();

        assert_eq!(cfg.listeners.len(), 1);
        assert_eq!(cfg.listeners[0].endpoint.port(), 4444);
        assert_eq!(cfg.listeners[0].max_clients, 16);
        assert!(!cfg.data_trace);
        assert!(!cfg.echo);
    }

    #[test]
    fn test_full_config_round_trips_through_toml() {
        // Arrange
        let cfg = DaemonConfig {
            listeners: vec![
                ListenerEntry {
                    endpoint: "127.0.0.1:4444".parse().unwrap(),
                    max_clients: 1,
                },
                ListenerEntry {
                    endpoint: "127.0.0.1:4445".parse().unwrap(),
                    max_clients: 8,
                },
            ],
            data_trace: true,
            echo: true,
            log_level: "debug".to_string(),
        };

        // Act
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: DaemonConfig = toml::from_str(&text).unwrap();

        // Assert
        assert_eq!(parsed, cfg);
    }

    #[test]
    fn test_missing_fields_fall_back_to_defaults() {
        // A minimal file with one listener and nothing else.
        let text = r#"
            [[listeners]]
            endpoint = "0.0.0.0:9000"
        "#;

        let cfg: DaemonConfig = toml::from_str(text).unwrap();

        assert_eq!(cfg.listeners[0].endpoint.port(), 9000);
        assert_eq!(cfg.listeners[0].max_clients, 16, "cap must default");
        assert_eq!(cfg.log_level, "info");
        assert!(!cfg.echo);
    }

    #[test]
    fn test_empty_file_parses_to_defaults() {
        let cfg: DaemonConfig = toml::from_str("").unwrap();
        assert_eq!(cfg, DaemonConfig::default());
    }

    #[test]
    fn test_load_daemon_config_returns_default_when_file_absent() {
        let path = std::env::temp_dir().join("bytelink-config-that-does-not-exist.toml");

        let cfg = load_daemon_config(&path).unwrap();

        assert_eq!(cfg, DaemonConfig::default());
    }

    #[test]
    fn test_load_daemon_config_rejects_malformed_toml() {
        let path = std::env::temp_dir().join("bytelink-config-malformed-test.toml");
        std::fs::write(&path, "listeners = \"not a list\"").unwrap();

        let result = load_daemon_config(&path);

        assert!(matches!(result, Err(ConfigError::Parse(_))));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_listener_entry_converts_to_listener_config() {
        let entry = ListenerEntry {
            endpoint: "10.0.0.1:7000".parse().unwrap(),
            max_clients: 4,
        };

        let cfg = entry.to_listener_config();

        assert_eq!(cfg.endpoint, entry.endpoint);
        assert_eq!(cfg.max_clients, 4);
    }
}
