use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{FrameError, Result};
use crate::event::{event_name, is_reserved};

/// Magic (2) + payload length (4) + event kind (2).
pub const HEADER_SIZE: usize = 8;

/// "CS".
pub const MAGIC: [u8; 2] = [0x43, 0x53];

/// Largest payload accepted by default: 16 MiB.
///
/// Chunks are far smaller than this; the bound only stops a bogus length
/// field from reserving memory.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// One protocol event as it travels on a peer connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Event kind (see [`crate::event`]). Never a reserved kind once decoded.
    pub kind: u16,
    pub payload: Bytes,
}

impl Frame {
    pub fn new(kind: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }

    /// Event name for logs.
    pub fn name(&self) -> &'static str {
        event_name(self.kind)
    }

    /// Bytes this event occupies on the wire.
    pub fn wire_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}

/// A validated event header.
///
/// ```text
/// offset 0   2            6          8
///        | C S | len u32 LE | kind u16 LE | payload (len bytes) ...
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub kind: u16,
    pub payload_len: usize,
}

impl Header {
    /// Read the header at the front of `src` without consuming it.
    ///
    /// `Ok(None)` means fewer than [`HEADER_SIZE`] bytes are buffered. Bad
    /// magic, reserved kinds and oversized lengths are rejected here, before
    /// any payload is waited for.
    pub fn peek(src: &[u8], max_payload: usize) -> Result<Option<Self>> {
        let Some(raw) = src.get(..HEADER_SIZE) else {
            return Ok(None);
        };
        if raw[..2] != MAGIC {
            return Err(FrameError::InvalidMagic);
        }

        let kind = u16::from_le_bytes([raw[6], raw[7]]);
        if is_reserved(kind) {
            return Err(FrameError::ReservedKind(kind));
        }

        let payload_len = u32::from_le_bytes([raw[2], raw[3], raw[4], raw[5]]) as usize;
        if payload_len > max_payload {
            return Err(FrameError::PayloadTooLarge {
                size: payload_len,
                max: max_payload,
            });
        }

        Ok(Some(Self { kind, payload_len }))
    }

    /// Header plus payload.
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.payload_len
    }
}

/// Append one event to `dst`.
///
/// Reserved kinds are refused so that nothing this crate writes is rejected
/// by its own decoder.
pub fn encode_frame(kind: u16, payload: &[u8], dst: &mut BytesMut) -> Result<()> {
    if is_reserved(kind) {
        return Err(FrameError::ReservedKind(kind));
    }
    let len = u32::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge {
        size: payload.len(),
        max: u32::MAX as usize,
    })?;

    dst.reserve(HEADER_SIZE + payload.len());
    dst.put_slice(&MAGIC);
    dst.put_u32_le(len);
    dst.put_u16_le(kind);
    dst.put_slice(payload);
    Ok(())
}

/// Take one complete event off the front of `src`.
///
/// Returns `Ok(None)` and leaves `src` untouched until the whole event is
/// buffered.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    let Some(header) = Header::peek(src, max_payload)? else {
        return Ok(None);
    };

    if src.len() < header.frame_len() {
        src.reserve(header.frame_len() - src.len());
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let payload = src.split_to(header.payload_len).freeze();
    Ok(Some(Frame {
        kind: header.kind,
        payload,
    }))
}

#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Largest payload accepted in either direction.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// Event codec for `tokio_util::codec::Framed` peer connections.
#[cfg(feature = "async")]
#[derive(Debug, Clone, Default)]
pub struct FrameCodec {
    config: FrameConfig,
}

#[cfg(feature = "async")]
impl FrameCodec {
    pub fn new(config: FrameConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

#[cfg(feature = "async")]
impl tokio_util::codec::Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        decode_frame(src, self.config.max_payload_size)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => {
                tracing::debug!(buffered = src.len(), "stream closed mid-frame");
                Err(FrameError::ConnectionClosed)
            }
        }
    }
}

#[cfg(feature = "async")]
impl tokio_util::codec::Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        if frame.payload.len() > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: frame.payload.len(),
                max: self.config.max_payload_size,
            });
        }
        encode_frame(frame.kind, &frame.payload, dst)
    }
}
