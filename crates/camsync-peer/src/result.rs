use std::time::Duration;

use bytes::Bytes;
use camsync_raw::{FormatTag, ReconstructedImage};

use crate::error::CaptureError;
use crate::metadata::FrameMetadata;

/// Format of [`CaptureSet::timestamp`].
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Local wall-clock time formatted as [`TIMESTAMP_FORMAT`].
pub fn capture_timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// One endpoint's successful transfer.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub endpoint_id: String,
    pub metadata: FrameMetadata,
    pub format: FormatTag,
    /// The transfer exactly as received.
    pub data: Bytes,
    /// Reconstructed image, for raw transfers when reconstruction is enabled.
    pub image: Option<ReconstructedImage>,
    /// From connecting (or reusing the connection) to the completion signal.
    pub transfer_time: Duration,
    /// Reconstruction; zero when nothing was reconstructed.
    pub processing_time: Duration,
}

impl CapturedFrame {
    /// `image_{timestamp}_{endpoint}.{ext}`, the name used when the frame is saved.
    pub fn file_name(&self, timestamp: &str) -> String {
        format!(
            "image_{timestamp}_{}.{}",
            self.endpoint_id,
            self.format.extension()
        )
    }

    pub fn total_time(&self) -> Duration {
        self.transfer_time + self.processing_time
    }
}

/// Outcome of one endpoint's cycle.
#[derive(Debug)]
pub enum CaptureResult {
    Captured(CapturedFrame),
    Failed(CaptureError),
}

impl CaptureResult {
    pub fn is_captured(&self) -> bool {
        matches!(self, CaptureResult::Captured(_))
    }

    pub fn frame(&self) -> Option<&CapturedFrame> {
        match self {
            CaptureResult::Captured(frame) => Some(frame),
            CaptureResult::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&CaptureError> {
        match self {
            CaptureResult::Captured(_) => None,
            CaptureResult::Failed(err) => Some(err),
        }
    }
}

/// A slot in a [`CaptureSet`].
#[derive(Debug)]
pub struct EndpointResult {
    pub endpoint_id: String,
    pub address: String,
    pub result: CaptureResult,
}

/// Result of one synchronized capture.
///
/// `results` holds one entry per configured endpoint, in configuration
/// order. Failed endpoints keep their slot; callers check presence per
/// endpoint instead of assuming every image is there.
#[derive(Debug)]
pub struct CaptureSet {
    pub timestamp: String,
    pub results: Vec<EndpointResult>,
}

impl CaptureSet {
    pub fn successes(&self) -> impl Iterator<Item = &CapturedFrame> {
        self.results.iter().filter_map(|r| r.result.frame())
    }

    /// `(endpoint id, error)` for every failed endpoint.
    pub fn failures(&self) -> impl Iterator<Item = (&str, &CaptureError)> {
        self.results
            .iter()
            .filter_map(|r| r.result.error().map(|e| (r.endpoint_id.as_str(), e)))
    }

    pub fn get(&self, endpoint_id: &str) -> Option<&EndpointResult> {
        self.results.iter().find(|r| r.endpoint_id == endpoint_id)
    }

    pub fn captured_count(&self) -> usize {
        self.successes().count()
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Every endpoint delivered.
    pub fn is_complete(&self) -> bool {
        self.results.iter().all(|r| r.result.is_captured())
    }
}
