use std::time::Duration;

use camsync_frame::FrameError;
use camsync_raw::RawError;

/// Failure of one endpoint's capture cycle.
///
/// These never escape the coordinator: they downgrade that endpoint's slot in
/// the [`CaptureSet`](crate::CaptureSet) and siblings carry on.
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// The endpoint could not be reached.
    #[error("connection to {address} failed: {reason}")]
    Connection { address: String, reason: String },

    /// No metadata arrived within the metadata phase.
    #[error("metadata timeout after {0:?}")]
    MetadataTimeout(Duration),

    /// The transfer stalled before the declared size arrived.
    #[error("chunk timeout after {after:?} ({received} of {expected} bytes received)")]
    ChunkTimeout {
        after: Duration,
        received: u64,
        expected: u64,
    },

    /// All bytes arrived but the completion signal did not.
    #[error("completion timeout after {0:?}")]
    CompletionTimeout(Duration),

    /// The endpoint reported a capture error.
    #[error("endpoint reported capture error: {0}")]
    Transfer(String),

    /// Declared and actual byte counts disagree.
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// The declared color-filter tiling is not recognized.
    #[error("unsupported filter pattern: {0:?}")]
    UnsupportedPattern(String),

    /// The declared format tag is not recognized.
    #[error("unsupported format: {0:?}")]
    UnsupportedFormat(String),

    /// Declared transfer exceeds the configured maximum.
    #[error("transfer too large ({size} bytes, max {max})")]
    TransferTooLarge { size: u64, max: u64 },

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(FrameError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The endpoint sent something the protocol does not allow here.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The connection closed mid-cycle.
    #[error("endpoint disconnected")]
    Disconnected,

    /// The whole capture was cancelled before this endpoint finished.
    #[error("cancelled")]
    Cancelled,

    /// The capture task failed unexpectedly.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CaptureError {
    /// Short stable label, used in tables and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            CaptureError::Connection { .. } => "connection",
            CaptureError::MetadataTimeout(_) => "metadata-timeout",
            CaptureError::ChunkTimeout { .. } => "chunk-timeout",
            CaptureError::CompletionTimeout(_) => "completion-timeout",
            CaptureError::Transfer(_) => "transfer",
            CaptureError::SizeMismatch { .. } => "size-mismatch",
            CaptureError::UnsupportedPattern(_) => "unsupported-pattern",
            CaptureError::UnsupportedFormat(_) => "unsupported-format",
            CaptureError::TransferTooLarge { .. } => "too-large",
            CaptureError::Frame(_) => "frame",
            CaptureError::Json(_) => "json",
            CaptureError::Protocol(_) => "protocol",
            CaptureError::Disconnected => "disconnected",
            CaptureError::Cancelled => "cancelled",
            CaptureError::Internal(_) => "internal",
        }
    }

    /// Whether the connection is still in a known state after this failure.
    ///
    /// Only an explicit capture-error ends a cycle cleanly; anything else may
    /// leave unread frames behind, so the session reconnects next cycle.
    pub fn keeps_connection(&self) -> bool {
        matches!(self, CaptureError::Transfer(_))
    }

    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            CaptureError::MetadataTimeout(_)
                | CaptureError::ChunkTimeout { .. }
                | CaptureError::CompletionTimeout(_)
        )
    }
}

impl From<FrameError> for CaptureError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::ReservedKind(kind) => CaptureError::Protocol(format!(
                "unexpected event kind {kind} ({})",
                camsync_frame::event_name(kind)
            )),
            other => CaptureError::Frame(other),
        }
    }
}

impl From<RawError> for CaptureError {
    fn from(err: RawError) -> Self {
        match err {
            RawError::SizeMismatch { expected, actual } => CaptureError::SizeMismatch {
                expected: expected as u64,
                actual: actual as u64,
            },
            RawError::UnsupportedPattern(p) => CaptureError::UnsupportedPattern(p),
            RawError::UnsupportedFormat(f) => CaptureError::UnsupportedFormat(f),
            other @ RawError::InvalidDimensions { .. } => CaptureError::Protocol(other.to_string()),
        }
    }
}

/// Configuration errors that make a capture impossible.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("no endpoints configured")]
    NoEndpoints,

    #[error("duplicate endpoint id {0:?}")]
    DuplicateEndpoint(String),
}

/// Failures of the endpoint-side capture source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The capture itself failed.
    #[error("capture failed: {0}")]
    Capture(String),

    /// The capture could not be written.
    #[error("insufficient storage: {0}")]
    InsufficientStorage(String),

    #[error("source I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RawError> for SourceError {
    fn from(err: RawError) -> Self {
        SourceError::Capture(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CaptureError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_explicit_capture_error_keeps_connection() {
        assert!(CaptureError::Transfer("no camera".into()).keeps_connection());
        assert!(!CaptureError::MetadataTimeout(Duration::from_secs(1)).keeps_connection());
        assert!(!CaptureError::Cancelled.keeps_connection());
        assert!(!CaptureError::SizeMismatch {
            expected: 2,
            actual: 1
        }
        .keeps_connection());
    }

    #[test]
    fn raw_errors_map_onto_taxonomy() {
        let err: CaptureError = RawError::SizeMismatch {
            expected: 20,
            actual: 19,
        }
        .into();
        assert!(matches!(
            err,
            CaptureError::SizeMismatch {
                expected: 20,
                actual: 19
            }
        ));

        let err: CaptureError = RawError::UnsupportedPattern("XYZW".into()).into();
        assert_eq!(err.kind(), "unsupported-pattern");
    }

    #[test]
    fn reserved_kind_is_a_protocol_failure() {
        let err: CaptureError = FrameError::ReservedKind(7).into();
        assert_eq!(err.kind(), "protocol");
        assert!(err.to_string().contains("reserved"));

        let err: CaptureError = FrameError::InvalidMagic.into();
        assert_eq!(err.kind(), "frame");
    }
}
