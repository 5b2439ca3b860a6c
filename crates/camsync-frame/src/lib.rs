//! Length-prefixed event framing for the camsync capture protocol.
//!
//! Every event on a peer connection is framed with:
//! - A 2-byte magic number ("CS") for stream synchronization
//! - A 4-byte little-endian payload length
//! - A 2-byte little-endian event kind
//!
//! Reserved event kinds are rejected as soon as the header is readable, so a
//! peer speaking something else fails before its payload is buffered.
//!
//! With the `async` feature, [`FrameCodec`] plugs the same layout into
//! `tokio_util::codec::Framed`.

pub mod codec;
pub mod error;
pub mod event;

#[cfg(feature = "async")]
pub use codec::FrameCodec;
pub use codec::{
    decode_frame, encode_frame, Frame, FrameConfig, Header, DEFAULT_MAX_PAYLOAD, HEADER_SIZE,
    MAGIC,
};
pub use error::{FrameError, Result};
pub use event::{
    event_name, is_protocol_event, is_reserved, CAPTURE_ERROR, CAPTURE_REQUEST, CHUNK, COMPLETE,
    EXTENSION_START, METADATA,
};
