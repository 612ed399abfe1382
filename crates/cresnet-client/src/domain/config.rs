//! Runtime settings for one [`CresnetClient`](crate::CresnetClient).
//!
//! [`ClientConfig`] is a plain struct: no file or environment reads happen
//! here.  The binary builds one from the TOML file and CLI flags (see
//! [`crate::infrastructure::storage::config`]); tests build one directly.

use std::time::Duration;

use cresnet_core::protocol::framing::DEFAULT_MAX_FRAME_LEN;
use cresnet_core::Capabilities;

/// TCP port a control processor listens on for Cresnet mobile clients.
pub const DEFAULT_PORT: u16 = 41790;

/// All runtime configuration for the client and its sessions.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use cresnet_client::ClientConfig;
///
/// let cfg = ClientConfig::new("10.0.0.20", 41790, "1234");
/// assert_eq!(cfg.addr(), "10.0.0.20:41790");
/// assert_eq!(cfg.heartbeat_interval, Duration::from_secs(10));
/// assert_eq!(cfg.idle_timeout, None);
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Hostname or IP address of the processor.
    pub host: String,
    pub port: u16,
    /// Sent verbatim (XML-escaped) in the connect request.
    pub passcode: String,
    /// After this much time without inbound bytes, heartbeats stop for good.
    /// `None` or zero disables the watchdog.
    pub idle_timeout: Option<Duration>,
    /// Period between heartbeat requests once connected.
    pub heartbeat_interval: Duration,
    /// How often the idle watchdog checks the last-activity time.
    pub idle_poll_interval: Duration,
    /// Pause between the processor's ready status and the connect request.
    pub connect_delay: Duration,
    /// Largest incomplete frame the reader will buffer.
    pub max_frame_len: usize,
    /// Per-subscriber event backlog before a slow subscriber starts lagging.
    pub event_capacity: usize,
    /// Flags advertised in the connect request.
    pub capabilities: Capabilities,
}

impl ClientConfig {
    /// Creates a config for `host:port` with every other field at its default.
    pub fn new(host: impl Into<String>, port: u16, passcode: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            passcode: passcode.into(),
            ..Self::default()
        }
    }

    /// `host:port`, as handed to the TCP connect.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ClientConfig {
    /// | Field              | Default          |
    /// |--------------------|------------------|
    /// | host               | `127.0.0.1`      |
    /// | port               | `41790`          |
    /// | passcode           | empty            |
    /// | idle_timeout       | disabled         |
    /// | heartbeat_interval | 10 seconds       |
    /// | idle_poll_interval | 1 second         |
    /// | connect_delay      | 1 second         |
    /// | max_frame_len      | 64 KiB           |
    /// | event_capacity     | 256              |
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            passcode: String::new(),
            idle_timeout: None,
            heartbeat_interval: Duration::from_secs(10),
            idle_poll_interval: Duration::from_secs(1),
            connect_delay: Duration::from_secs(1),
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            event_capacity: 256,
            capabilities: Capabilities::default(),
        }
    }
}
