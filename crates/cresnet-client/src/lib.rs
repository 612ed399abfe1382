//! cresnet-client library crate.
//!
//! An async client that holds one TCP session with a Crestron control
//! processor, mirrors every signal the processor publishes, and writes
//! signal values back to it.
//!
//! # Architecture
//!
//! ```text
//! caller (binary, bridge, tests)
//!         ↕
//! [cresnet-client]
//!   ├── domain/           Plain types: ClientConfig, ClientEvent, ClientError
//!   ├── infrastructure/
//!   │     ├── network/    Session task over the socket + heartbeat scheduler
//!   │     └── storage/    TOML config file
//!   └── application/      CresnetClient facade used by callers
//!         ↕
//! control processor  (Cresnet XML over TCP, port 41790 by default)
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O; it depends on `cresnet-core` types only.
//! - `infrastructure` owns sockets, timers and files.
//! - `application` wires the two together and is the only layer callers need.
//!
//! # Quick start
//!
//! ```no_run
//! use cresnet_client::{ClientConfig, ClientEvent, CresnetClient};
//!
//! # async fn example() -> Result<(), cresnet_client::ClientError> {
//! let client = CresnetClient::new(ClientConfig::new("192.168.1.50", 41790, "1234"));
//! let mut events = client.subscribe();
//! let session = client.connect().await?;
//!
//! while let Ok(event) = events.recv().await {
//!     if let ClientEvent::Connected = event {
//!         client.press_button(20).await?;
//!         break;
//!     }
//! }
//!
//! client.shutdown().await;
//! session.join().await?;
//! # Ok(())
//! # }
//! ```

/// Domain layer: configuration, events and errors.
pub mod domain;

/// Infrastructure layer: session I/O, heartbeats and config persistence.
pub mod infrastructure;

/// Application layer: the client facade.
pub mod application;

pub use application::client::{CresnetClient, SessionHandle};
pub use domain::config::ClientConfig;
pub use domain::error::ClientError;
pub use domain::events::{ClientEvent, ConnectionState, DisconnectReason};
pub use infrastructure::storage::config::ConfigError;
