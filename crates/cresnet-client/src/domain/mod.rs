//! Domain types for the client.
//!
//! Nothing here performs I/O; infrastructure fills these types in and the
//! application layer hands them to callers.

pub mod config;
pub mod error;
pub mod events;

pub use config::ClientConfig;
pub use error::ClientError;
pub use events::{ClientEvent, ConnectionState, DisconnectReason};
