//! Connection lifecycle and the events published to subscribers.

use std::fmt;

use cresnet_core::{SignalClass, SignalValue};

/// Where a session is in its lifecycle.
///
/// ```text
/// Disconnected → Connecting → AwaitingReady → Authenticating → Connected
///       ↑                                                          │
///       └──────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No socket.
    Disconnected,
    /// TCP connect in progress.
    Connecting,
    /// Socket open, waiting for the processor's ready status.
    AwaitingReady,
    /// Connect request sent, waiting for the response code.
    Authenticating,
    /// Authenticated; signal reads and writes are live.
    Connected,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == ConnectionState::Connected
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::AwaitingReady => "awaiting-ready",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Connected => "connected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session ended.  Recorded once, by whoever ends the session first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// The caller asked for shutdown.
    Requested,
    /// The processor sent a disconnect request.
    ProcessorDisconnected,
    /// The processor closed the socket.
    ConnectionClosed,
    /// Reading from or writing to the socket failed.
    TransportFailure,
    /// The processor rejected the passcode.
    AuthenticationRejected,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DisconnectReason::Requested => "shutdown requested",
            DisconnectReason::ProcessorDisconnected => "processor disconnected",
            DisconnectReason::ConnectionClosed => "connection closed",
            DisconnectReason::TransportFailure => "transport failure",
            DisconnectReason::AuthenticationRejected => "authentication rejected",
        };
        f.write_str(text)
    }
}

/// Notification delivered to every subscriber of a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The processor accepted the passcode; writes are now allowed.
    Connected,
    /// The session ended.  Emitted exactly once per session.
    Disconnected { reason: DisconnectReason },
    /// The processor rejected the passcode with `code`.
    AuthFailed { code: i32 },
    /// A signal changed value (or was seen for the first time).
    DataChanged {
        class: SignalClass,
        id: u32,
        value: SignalValue,
    },
    /// A heartbeat response arrived.
    HeartbeatObserved,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connected_state_is_connected() {
        let states = [
            ConnectionState::Disconnected,
            ConnectionState::Connecting,
            ConnectionState::AwaitingReady,
            ConnectionState::Authenticating,
            ConnectionState::Connected,
        ];

        let connected: Vec<_> = states.into_iter().filter(|s| s.is_connected()).collect();

        assert_eq!(connected, vec![ConnectionState::Connected]);
    }

    #[test]
    fn test_disconnect_reason_display() {
        assert_eq!(
            DisconnectReason::ProcessorDisconnected.to_string(),
            "processor disconnected"
        );
        assert_eq!(ConnectionState::AwaitingReady.to_string(), "awaiting-ready");
    }
}
