//! Cresnet client – entry point.
//!
//! Connects to a Crestron control processor, mirrors its signals, and logs
//! every change.  Sessions are restarted after the processor drops them
//! unless reconnecting is disabled or the passcode was rejected.
//!
//! The binary mirrors state, so it reconnects as soon as a session ends,
//! including one the processor dropped after the idle timeout stopped
//! heartbeats.  Set `idle_timeout_secs = 0` (or pass `--no-reconnect`) when
//! a quiet processor should be left alone.
//!
//! # Usage
//!
//! ```text
//! cresnet-client [OPTIONS]
//!
//! Options:
//!   --config       <PATH>  TOML config file [default: cresnet.toml]
//!   --host         <HOST>  Control processor hostname or IP
//!   --port         <PORT>  Control processor port
//!   --passcode     <CODE>  Connect passcode
//!   --idle-timeout <SECS>  Stop heartbeats after this much silence (0 = never)
//!   --no-reconnect         Exit when the first session ends
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable               | Flag             |
//! |------------------------|------------------|
//! | `CRESNET_CONFIG`       | `--config`       |
//! | `CRESNET_HOST`         | `--host`         |
//! | `CRESNET_PORT`         | `--port`         |
//! | `CRESNET_PASSCODE`     | `--passcode`     |
//! | `CRESNET_IDLE_TIMEOUT` | `--idle-timeout` |
//!
//! Flags win over the config file.  `RUST_LOG` wins over `client.log_level`.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use cresnet_client::infrastructure::storage::config::{load_config, AppConfig};
use cresnet_client::{ClientError, ClientEvent, CresnetClient};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Crestron control-processor client.
#[derive(Debug, Parser)]
#[command(
    name = "cresnet-client",
    about = "Mirror the signals of a Crestron control processor over Cresnet",
    version
)]
struct Cli {
    /// Path to the TOML config file.  A missing file is not an error.
    #[arg(long, default_value = "cresnet.toml", env = "CRESNET_CONFIG")]
    config: PathBuf,

    /// Hostname or IP address of the control processor.
    #[arg(long, env = "CRESNET_HOST")]
    host: Option<String>,

    /// TCP port of the control processor.
    #[arg(long, env = "CRESNET_PORT")]
    port: Option<u16>,

    /// Passcode sent in the connect request.
    #[arg(long, env = "CRESNET_PASSCODE", hide_env_values = true)]
    passcode: Option<String>,

    /// Seconds without inbound traffic before heartbeats stop; 0 disables.
    #[arg(long, env = "CRESNET_IDLE_TIMEOUT")]
    idle_timeout: Option<u64>,

    /// Exit when the first session ends instead of reconnecting.
    #[arg(long)]
    no_reconnect: bool,
}

impl Cli {
    /// Loads the config file and applies flag overrides on top of it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// merged settings fail validation.
    fn into_app_config(self) -> anyhow::Result<AppConfig> {
        let mut cfg = load_config(&self.config)
            .with_context(|| format!("loading config from {}", self.config.display()))?;

        if let Some(host) = self.host {
            cfg.processor.host = host;
        }
        if let Some(port) = self.port {
            cfg.processor.port = port;
        }
        if let Some(passcode) = self.passcode {
            cfg.processor.passcode = passcode;
        }
        if let Some(secs) = self.idle_timeout {
            cfg.processor.idle_timeout_secs = secs;
        }
        if self.no_reconnect {
            cfg.client.reconnect = false;
        }

        cfg.validate().context("invalid configuration")?;
        Ok(cfg)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Cli::parse().into_app_config()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&cfg.client.log_level)),
        )
        .init();

    let client = CresnetClient::new(cfg.to_client_config());
    info!(
        "cresnet-client starting – processor={}",
        client.config().addr()
    );

    let logger = tokio::spawn(log_events(client.subscribe()));

    tokio::select! {
        result = run_sessions(&client, &cfg) => {
            if let Err(e) = &result {
                error!("stopping: {e}");
            }
            client.shutdown().await;
            logger.abort();
            result.map_err(anyhow::Error::from)
        }
        signal = tokio::signal::ctrl_c() => {
            match signal {
                Ok(()) => info!("received Ctrl+C – shutting down"),
                Err(e) => error!("failed to listen for Ctrl+C: {e}"),
            }
            client.shutdown().await;
            logger.abort();
            info!("cresnet-client stopped");
            Ok(())
        }
    }
}

/// Runs sessions back to back until one ends in a way that must not be
/// retried.
async fn run_sessions(client: &CresnetClient, cfg: &AppConfig) -> Result<(), ClientError> {
    loop {
        match client.run().await {
            Ok(reason) => info!("session ended: {reason}"),
            Err(e @ ClientError::Authentication { .. }) => return Err(e),
            Err(e) => warn!("session failed: {e}"),
        }

        if !cfg.client.reconnect {
            return Ok(());
        }
        let wait = cfg.reconnect_interval();
        info!("reconnecting in {wait:?}");
        tokio::time::sleep(wait).await;
    }
}

async fn log_events(mut events: tokio::sync::broadcast::Receiver<ClientEvent>) {
    loop {
        match events.recv().await {
            Ok(ClientEvent::Connected) => info!("connected"),
            Ok(ClientEvent::Disconnected { reason }) => info!("disconnected: {reason}"),
            Ok(ClientEvent::AuthFailed { code }) => error!("passcode rejected (code {code})"),
            Ok(ClientEvent::DataChanged { class, id, value }) => info!("{class} {id} = {value}"),
            Ok(ClientEvent::HeartbeatObserved) => debug!("heartbeat"),
            Err(RecvError::Lagged(n)) => warn!("event log fell behind; skipped {n} events"),
            Err(RecvError::Closed) => break,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn cli(args: &[&str]) -> Cli {
        let mut argv = vec!["cresnet-client"];
        argv.extend_from_slice(args);
        Cli::parse_from(argv)
    }

    #[test]
    fn test_cli_defaults() {
        let cli = cli(&["--config", "/nonexistent/cresnet.toml"]);

        assert_eq!(cli.host, None);
        assert_eq!(cli.port, None);
        assert!(!cli.no_reconnect);
    }

    #[test]
    fn test_flags_alone_produce_valid_config() {
        // Arrange
        let cli = cli(&[
            "--config",
            "/nonexistent/cresnet.toml",
            "--host",
            "10.0.0.7",
            "--passcode",
            "4321",
            "--idle-timeout",
            "0",
        ]);

        // Act
        let cfg = cli.into_app_config().unwrap();

        // Assert
        assert_eq!(cfg.processor.host, "10.0.0.7");
        assert_eq!(cfg.processor.port, 41790);
        assert_eq!(cfg.to_client_config().idle_timeout, None);
    }

    #[test]
    fn test_flags_override_file_values() {
        // Arrange
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[processor]\nhost = \"10.0.0.1\"\nport = 5000\npasscode = \"1111\""
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();

        // Act
        let cfg = cli(&["--config", &path, "--port", "41794", "--no-reconnect"])
            .into_app_config()
            .unwrap();

        // Assert
        assert_eq!(cfg.processor.host, "10.0.0.1");
        assert_eq!(cfg.processor.port, 41794);
        assert!(!cfg.client.reconnect);
    }

    #[test]
    fn test_missing_host_is_rejected() {
        let result = cli(&["--config", "/nonexistent/cresnet.toml", "--passcode", "1"])
            .into_app_config();

        assert!(result.is_err());
    }
}
