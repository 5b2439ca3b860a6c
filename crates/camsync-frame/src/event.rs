//! Event kinds carried in the frame header.
//!
//! Kinds 1-5 are the capture protocol. Everything else up to 255 is reserved;
//! kinds from 256 up are free for extensions.

/// Client -> endpoint: start a capture.
pub const CAPTURE_REQUEST: u16 = 1;

/// Endpoint -> client: transfer description, sent once before any chunk.
pub const METADATA: u16 = 2;

/// Endpoint -> client: a slice of the transfer body.
pub const CHUNK: u16 = 3;

/// Endpoint -> client: the transfer is finished.
pub const COMPLETE: u16 = 4;

/// Endpoint -> client: the capture failed; terminates the transfer.
pub const CAPTURE_ERROR: u16 = 5;

/// First extension event kind.
pub const EXTENSION_START: u16 = 256;

/// Returns a human-readable name for an event kind.
pub fn event_name(kind: u16) -> &'static str {
    match kind {
        CAPTURE_REQUEST => "capture-request",
        METADATA => "metadata",
        CHUNK => "chunk",
        COMPLETE => "complete",
        CAPTURE_ERROR => "capture-error",
        0 | 6..=255 => "reserved",
        _ => "extension",
    }
}

/// Returns true if the kind is one of the capture protocol events.
pub fn is_protocol_event(kind: u16) -> bool {
    (CAPTURE_REQUEST..=CAPTURE_ERROR).contains(&kind)
}

/// Returns true if the kind is neither a protocol event nor an extension.
///
/// Reserved kinds never appear on a well-behaved connection.
pub fn is_reserved(kind: u16) -> bool {
    !is_protocol_event(kind) && kind < EXTENSION_START
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names() {
        assert_eq!(event_name(METADATA), "metadata");
        assert_eq!(event_name(0), "reserved");
        assert_eq!(event_name(42), "reserved");
        assert_eq!(event_name(EXTENSION_START), "extension");
    }

    #[test]
    fn protocol_range() {
        assert!(is_protocol_event(CAPTURE_REQUEST));
        assert!(is_protocol_event(CAPTURE_ERROR));
        assert!(!is_protocol_event(0));
        assert!(!is_protocol_event(6));
    }

    #[test]
    fn reserved_range() {
        assert!(is_reserved(0));
        assert!(is_reserved(6));
        assert!(is_reserved(255));
        assert!(!is_reserved(CHUNK));
        assert!(!is_reserved(EXTENSION_START));
    }
}
