//! Infrastructure layer for the client.
//!
//! # Sub-modules
//!
//! - **`network`** – The session task that owns the socket, runs the
//!   handshake and applies inbound data, plus the heartbeat scheduler that
//!   keeps an authenticated session alive.
//!
//! - **`storage`** – Loading and validating the TOML configuration file.

pub mod network;
pub mod storage;
