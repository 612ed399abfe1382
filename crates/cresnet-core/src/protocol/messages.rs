//! Cresnet protocol message types.
//!
//! Every message on the wire is a single `<cresnet>` element.  There is no
//! length prefix and no request/response correlation; the processor's
//! replies are recognised purely by the elements they contain.
//!
//! ```text
//! processor → client   <cresnet><control><comm><status>02</status></comm></control></cresnet>
//! client → processor   <cresnet><control><comm><connectRequest>…</connectRequest></comm></control></cresnet>
//! processor → client   <cresnet><control><comm><connectResponse><code>0</code></connectResponse></comm></control></cresnet>
//! client → processor   <cresnet><data eom="false" som="false"><updateCommand><updateRequest/></updateCommand></data></cresnet>
//! processor → client   <cresnet><data …><bool id="5" value="true"/></data></cresnet>
//! ```

use crate::domain::signal::SignalClass;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Root element of every Cresnet message.
pub const ROOT_ELEMENT: &str = "cresnet";

/// `status` text announcing that the processor will accept a connect request.
pub const STATUS_READY_FOR_CONNECT: &str = "02";

/// `code` value in a connect response that means the passcode was accepted.
pub const CONNECT_CODE_ACCEPTED: i32 = 0;

/// Product name reported in the connect request's device block.
pub const DEVICE_PRODUCT: &str = "Crestron Mobile Android";

/// Version string reported in the connect request's device block.
pub const DEVICE_VERSION: &str = " 1.00.01.42";

/// Value of `maxExtendedLengthPacketMask` in the device block.
pub const MAX_EXTENDED_LENGTH_PACKET_MASK: u8 = 3;

/// Full state refresh request, sent right after authentication.
pub const UPDATE_REQUEST: &str = "<cresnet><data eom=\"false\" som=\"false\"><updateCommand><updateRequest></updateRequest></updateCommand></data></cresnet>";

/// Keep-alive request.  The processor answers with a `heartbeatResponse`.
pub const HEARTBEAT_REQUEST: &str = "<cresnet><control><comm><heartbeatRequest></heartbeatRequest></comm></control></cresnet>";

// ── Connect capabilities ──────────────────────────────────────────────────────

/// Capability flags advertised in the `<mode>` element of a connect request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub authentication_required: bool,
    pub digital_repeat: bool,
    pub heartbeat: bool,
    pub program_ready: bool,
    pub unicode: bool,
}

impl Default for Capabilities {
    /// No authentication; repeat, heartbeat, program-ready and unicode supported.
    fn default() -> Self {
        Self {
            authentication_required: false,
            digital_repeat: true,
            heartbeat: true,
            program_ready: true,
            unicode: true,
        }
    }
}

// ── Decoded inbound messages ──────────────────────────────────────────────────

/// One decoded message from the processor.
///
/// The set is closed: everything the client does not act on ends up in
/// [`CresnetMessage::Unrecognized`] so the session can log and drop it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CresnetMessage {
    /// `status` 02: the processor is ready for a connect request.
    ReadyForConnect,
    /// Connect response with code 0.
    ConnectAccepted(i32),
    /// Connect response with any non-zero code (usually a bad passcode).
    ConnectRejected(i32),
    /// Reply to a heartbeat request.
    HeartbeatResponse,
    /// The processor is closing the session.
    DisconnectNotice,
    /// A signal value published by the processor; `raw_value` is still text.
    DataUpdate {
        class: SignalClass,
        id: u32,
        raw_value: String,
    },
    /// Anything else, kept verbatim for debug logging.
    Unrecognized(String),
}

impl CresnetMessage {
    /// Short variant name for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            CresnetMessage::ReadyForConnect => "ReadyForConnect",
            CresnetMessage::ConnectAccepted(_) => "ConnectAccepted",
            CresnetMessage::ConnectRejected(_) => "ConnectRejected",
            CresnetMessage::HeartbeatResponse => "HeartbeatResponse",
            CresnetMessage::DisconnectNotice => "DisconnectNotice",
            CresnetMessage::DataUpdate { .. } => "DataUpdate",
            CresnetMessage::Unrecognized(_) => "Unrecognized",
        }
    }
}
