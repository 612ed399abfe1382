//! Protocol module containing message types, the XML codec, and stream framing.

pub mod codec;
pub mod framing;
pub mod messages;

pub use codec::{decode_frame, encode_connect_request, encode_data, ProtocolError};
pub use framing::FrameDecoder;
pub use messages::*;
