//! Error type returned by the client and its session.

use cresnet_core::{ProtocolError, SignalError};
use thiserror::Error;

/// Everything that can go wrong talking to a control processor.
#[derive(Debug, Error)]
pub enum ClientError {
    /// TCP connection to the processor failed.
    #[error("failed to connect to control processor at {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// An I/O error occurred on the established connection.
    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An inbound frame could not be decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The processor refused the passcode.
    #[error("control processor rejected the connect request (code {code})")]
    Authentication { code: i32 },

    /// A write was attempted while no authenticated session exists.
    #[error("not connected to a control processor")]
    NotConnected,

    /// A signal class or value supplied by the caller is invalid.
    #[error(transparent)]
    Signal(#[from] SignalError),

    /// `connect` was called while a session is still live.
    #[error("a session is already active")]
    SessionActive,

    /// A bounded wait elapsed.
    #[error("timed out waiting for the session")]
    Timeout,

    /// The session task panicked or was aborted.
    #[error("session task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
