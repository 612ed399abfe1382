//! TOML configuration file for the `cresnet-client` binary.
//!
//! ```toml
//! [processor]
//! host = "192.168.1.50"
//! port = 41790
//! passcode = "1234"
//! idle_timeout_secs = 60
//!
//! [client]
//! heartbeat_interval_secs = 10
//! reconnect = true
//! reconnect_interval_secs = 5
//! log_level = "info"
//! ```
//!
//! Every field except `host` and `passcode` has a default, so a minimal file
//! only needs those two.  A missing file yields [`AppConfig::default()`];
//! [`AppConfig::validate`] then reports what still has to be supplied (for
//! example through CLI flags).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::config::{ClientConfig, DEFAULT_PORT};

/// Error type for configuration file operations.
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

    /// A required setting was not supplied.
    #[error("missing required setting `{0}`")]
    Missing(&'static str),

    /// A setting has an unusable value.
    #[error("invalid setting `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub processor: ProcessorConfig,
    #[serde(default)]
    pub client: ClientSection,
}

/// Where the control processor is and how to authenticate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessorConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub passcode: String,
    /// Seconds without inbound traffic before heartbeats stop.  `0` disables.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

/// Client behaviour settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientSection {
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Start a new session after the previous one ends (never after an
    /// authentication failure).  A session the processor drops after the
    /// idle timeout stopped its heartbeats is restarted too, so heartbeats
    /// resume with the new session.
    #[serde(default = "default_true")]
    pub reconnect: bool,
    #[serde(default = "default_reconnect_interval_secs")]
    pub reconnect_interval_secs: u64,
    /// `tracing` filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_idle_timeout_secs() -> u64 {
    60
}
fn default_heartbeat_interval_secs() -> u64 {
    10
}
fn default_true() -> bool {
    true
}
fn default_reconnect_interval_secs() -> u64 {
    5
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            passcode: String::new(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            reconnect: default_true(),
            reconnect_interval_secs: default_reconnect_interval_secs(),
            log_level: default_log_level(),
        }
    }
}

impl AppConfig {
    /// Checks that the settings can produce a working client.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Missing`] for an empty host or passcode;
    /// [`ConfigError::Invalid`] for port 0, a zero heartbeat interval, or a
    /// zero reconnect interval while reconnecting is enabled.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.processor.host.trim().is_empty() {
            return Err(ConfigError::Missing("processor.host"));
        }
        if self.processor.passcode.is_empty() {
            return Err(ConfigError::Missing("processor.passcode"));
        }
        if self.processor.port == 0 {
            return Err(ConfigError::Invalid {
                field: "processor.port",
                reason: "must be between 1 and 65535",
            });
        }
        if self.client.heartbeat_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "client.heartbeat_interval_secs",
                reason: "must be at least 1",
            });
        }
        if self.client.reconnect && self.client.reconnect_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "client.reconnect_interval_secs",
                reason: "must be at least 1 when reconnecting",
            });
        }
        Ok(())
    }

    /// Builds the runtime [`ClientConfig`]; unspecified knobs keep their
    /// defaults.
    pub fn to_client_config(&self) -> ClientConfig {
        let idle = self.processor.idle_timeout_secs;
        ClientConfig {
            idle_timeout: (idle > 0).then(|| Duration::from_secs(idle)),
            heartbeat_interval: Duration::from_secs(self.client.heartbeat_interval_secs),
            ..ClientConfig::new(
                self.processor.host.trim(),
                self.processor.port,
                self.processor.passcode.clone(),
            )
        }
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_secs(self.client.reconnect_interval_secs)
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Loads `AppConfig` from `path`, returning `AppConfig::default()` if the file
/// does not exist.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: &Path) -> Result<AppConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => {
            let cfg: AppConfig = toml::from_str(&content)?;
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AppConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
