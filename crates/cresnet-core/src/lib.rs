//! # cresnet-core
//!
//! Shared library for the Cresnet client containing the signal model, the
//! in-memory state store, and the XML wire codec spoken by the control
//! processor.
//!
//! This crate has zero dependencies on sockets or an async runtime; the
//! session that owns the TCP connection lives in `cresnet-client`.
//!
//! # Architecture overview
//!
//! A control processor publishes its I/O as *signals*.  Each signal is
//! addressed by a class (digital, analog, serial) and a numeric id, and the
//! processor pushes a `data` message whenever one changes.
//!
//! - **`domain`** – The signal types and the [`StateStore`] that remembers the
//!   last value seen for every `(class, id)` pair.
//!
//! - **`protocol`** – How bytes travel over the network.  Outbound commands are
//!   rendered to `<cresnet>` envelopes; inbound bytes are cut into complete
//!   top-level elements by the [`FrameDecoder`] and turned into typed
//!   [`CresnetMessage`] values by [`decode_frame`].

pub mod domain;
pub mod protocol;

pub use domain::signal::{SignalClass, SignalError, SignalValue};
pub use domain::state_store::StateStore;
pub use protocol::codec::{decode_frame, encode_connect_request, encode_data, ProtocolError};
pub use protocol::framing::FrameDecoder;
pub use protocol::messages::{Capabilities, CresnetMessage};
