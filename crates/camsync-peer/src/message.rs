use bytes::Bytes;
use camsync_frame::{event, event_name, Frame};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CaptureError, Result};
use crate::metadata::{CaptureFailure, CaptureRequest, Completion, FrameMetadata};

/// A typed protocol event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    CaptureRequest(CaptureRequest),
    Metadata(FrameMetadata),
    Chunk(Bytes),
    Complete(Completion),
    CaptureError(CaptureFailure),
}

impl Message {
    /// Event kind this message travels under.
    pub fn kind(&self) -> u16 {
        match self {
            Message::CaptureRequest(_) => event::CAPTURE_REQUEST,
            Message::Metadata(_) => event::METADATA,
            Message::Chunk(_) => event::CHUNK,
            Message::Complete(_) => event::COMPLETE,
            Message::CaptureError(_) => event::CAPTURE_ERROR,
        }
    }

    /// The echoed request id, for events that carry one.
    pub fn request_id(&self) -> Option<u64> {
        match self {
            Message::CaptureRequest(r) => Some(r.request_id),
            Message::Metadata(m) => m.request_id,
            Message::Complete(c) => c.request_id,
            Message::CaptureError(e) => e.request_id,
            Message::Chunk(_) => None,
        }
    }

    pub fn to_frame(&self) -> Result<Frame> {
        let payload = match self {
            Message::CaptureRequest(r) => to_json(r)?,
            Message::Metadata(m) => to_json(m)?,
            Message::Chunk(bytes) => bytes.clone(),
            Message::Complete(c) => to_json(c)?,
            Message::CaptureError(e) => to_json(e)?,
        };
        Ok(Frame::new(self.kind(), payload))
    }

    /// Decode a frame. Reserved and extension kinds are protocol errors.
    pub fn from_frame(frame: Frame) -> Result<Self> {
        match frame.kind {
            event::CAPTURE_REQUEST => from_json(&frame).map(Message::CaptureRequest),
            event::METADATA => from_json(&frame).map(Message::Metadata),
            event::CHUNK => Ok(Message::Chunk(frame.payload)),
            // `complete` carries an empty object; tolerate an empty payload too.
            event::COMPLETE if frame.payload.is_empty() => {
                Ok(Message::Complete(Completion::default()))
            }
            event::COMPLETE => from_json(&frame).map(Message::Complete),
            event::CAPTURE_ERROR => from_json(&frame).map(Message::CaptureError),
            kind => Err(CaptureError::Protocol(format!(
                "unexpected event kind {kind} ({})",
                event_name(kind)
            ))),
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(value)?))
}

fn from_json<T: DeserializeOwned>(frame: &Frame) -> Result<T> {
    serde_json::from_slice(&frame.payload).map_err(|e| {
        CaptureError::Protocol(format!("malformed {} payload: {e}", event_name(frame.kind)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::tests::raw_metadata;

    #[test]
    fn metadata_frame_carries_json() {
        let mut meta = raw_metadata(4, 4);
        meta.request_id = Some(3);
        let frame = Message::Metadata(meta.clone()).to_frame().unwrap();
        assert_eq!(frame.kind, event::METADATA);

        let json: serde_json::Value = serde_json::from_slice(&frame.payload).unwrap();
        assert_eq!(json["size"], 20);
        assert_eq!(json["filter_pattern"], "RGGB");

        let back = Message::from_frame(frame).unwrap();
        assert_eq!(back, Message::Metadata(meta));
        assert_eq!(back.request_id(), Some(3));
    }

    #[test]
    fn chunk_is_raw_bytes() {
        let frame = Message::Chunk(Bytes::from_static(&[0xFF, 0x00])).to_frame().unwrap();
        assert_eq!(frame.payload.as_ref(), &[0xFF, 0x00]);
        assert_eq!(
            Message::from_frame(frame).unwrap(),
            Message::Chunk(Bytes::from_static(&[0xFF, 0x00]))
        );
    }

    #[test]
    fn complete_accepts_empty_object_and_empty_payload() {
        let empty = Frame::new(event::COMPLETE, Bytes::new());
        assert_eq!(
            Message::from_frame(empty).unwrap(),
            Message::Complete(Completion::default())
        );

        let obj = Frame::new(event::COMPLETE, Bytes::from_static(b"{}"));
        assert_eq!(Message::from_frame(obj).unwrap().request_id(), None);
    }

    #[test]
    fn capture_error_reason() {
        let frame = Frame::new(
            event::CAPTURE_ERROR,
            Bytes::from_static(br#"{"request_id":9,"reason":"camera busy"}"#),
        );
        match Message::from_frame(frame).unwrap() {
            Message::CaptureError(f) => {
                assert_eq!(f.request_id, Some(9));
                assert_eq!(f.reason, "camera busy");
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn reserved_kind_is_protocol_error() {
        let err = Message::from_frame(Frame::new(42, Bytes::new())).unwrap_err();
        assert!(matches!(err, CaptureError::Protocol(msg) if msg.contains("reserved")));
    }

    #[test]
    fn malformed_json_is_protocol_error() {
        let err = Message::from_frame(Frame::new(event::METADATA, Bytes::from_static(b"{"))).unwrap_err();
        assert!(matches!(err, CaptureError::Protocol(_)));
    }
}
