//! Application layer for the client.
//!
//! - **`client`** – [`CresnetClient`](client::CresnetClient), the facade that
//!   starts sessions, writes signals, and exposes the mirrored state and the
//!   event stream to callers.

pub mod client;
