//! The transfer description both sides of the protocol agree on.

use std::fmt;
use std::str::FromStr;

use camsync_raw::{packed_len, FilterPattern, FormatTag};
use serde::{Deserialize, Serialize};

use crate::error::{CaptureError, Result};

/// Resolution used when a capture does not ask for one.
pub const DEFAULT_RESOLUTION: Resolution = Resolution {
    width: 2304,
    height: 1296,
};

/// Format used when a capture does not ask for one.
pub const DEFAULT_FORMAT: &str = "raw";

/// A `width x height` pair, written `"WxH"` on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

/// A resolution string that is not `WxH` with two non-zero integers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid resolution {0:?} (expected WxH, e.g. 2304x1296)")]
pub struct ResolutionError(pub String);

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for Resolution {
    fn default() -> Self {
        DEFAULT_RESOLUTION
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = ResolutionError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = || ResolutionError(s.to_string());
        let (w, h) = s.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
        let width: u32 = w.trim().parse().map_err(|_| invalid())?;
        let height: u32 = h.trim().parse().map_err(|_| invalid())?;
        if width == 0 || height == 0 {
            return Err(invalid());
        }
        Ok(Self { width, height })
    }
}

impl TryFrom<String> for Resolution {
    type Error = ResolutionError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Resolution> for String {
    fn from(r: Resolution) -> Self {
        r.to_string()
    }
}

/// Client -> endpoint: take one picture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRequest {
    #[serde(default)]
    pub request_id: u64,
    #[serde(default)]
    pub resolution: Resolution,
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_format() -> String {
    DEFAULT_FORMAT.to_string()
}

impl Default for CaptureRequest {
    fn default() -> Self {
        Self {
            request_id: 0,
            resolution: DEFAULT_RESOLUTION,
            format: default_format(),
        }
    }
}

/// Endpoint -> client: describes the transfer that follows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameMetadata {
    /// Echo of the request id; absent for endpoints that do not echo.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    pub filename: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub node_id: String,
    /// Total bytes the chunks will carry.
    pub size: u64,
    pub chunk_size: u64,
    /// Requested width and height.
    pub width: u32,
    pub height: u32,
    /// Native sensor geometry of the packed dump.
    pub sensor_width: u32,
    pub sensor_height: u32,
    #[serde(default)]
    pub filter_pattern: String,
    #[serde(default = "default_format")]
    pub format: String,
}

/// Parsed view of a validated [`FrameMetadata`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferLayout {
    pub pattern: FilterPattern,
    pub format: FormatTag,
}

impl FrameMetadata {
    /// Check the declaration before any chunk is accepted.
    ///
    /// For raw transfers the declared size must be exactly the packed size of
    /// the sensor geometry; encoded transfers carry their literal file size.
    pub fn validate(&self, max_transfer: u64) -> Result<TransferLayout> {
        if self.chunk_size == 0 {
            return Err(CaptureError::Protocol("metadata declares chunk_size 0".into()));
        }
        if self.size > max_transfer {
            return Err(CaptureError::TransferTooLarge {
                size: self.size,
                max: max_transfer,
            });
        }

        let format: FormatTag = self.format.parse()?;
        let pattern: FilterPattern = self.filter_pattern.parse()?;

        if format.is_raw() {
            if self.width == 0 || self.height == 0 {
                return Err(CaptureError::Protocol(format!(
                    "metadata declares empty resolution {}x{}",
                    self.width, self.height
                )));
            }
            let expected = self.expected_raw_size().ok_or_else(|| {
                CaptureError::Protocol(format!(
                    "invalid sensor geometry {}x{}",
                    self.sensor_width, self.sensor_height
                ))
            })?;
            if self.size != expected {
                return Err(CaptureError::SizeMismatch {
                    expected,
                    actual: self.size,
                });
            }
            // The requested grid is allocated client-side; bound it like the payload.
            let requested = (self.width as usize)
                .checked_mul(self.height as usize)
                .and_then(packed_len)
                .map(|n| n as u64);
            if requested.is_none_or(|n| n > max_transfer) {
                return Err(CaptureError::Protocol(format!(
                    "declared resolution {}x{} exceeds the transfer limit of {max_transfer} bytes",
                    self.width, self.height
                )));
            }
        }

        Ok(TransferLayout { pattern, format })
    }

    /// Packed size of the declared sensor geometry, or `None` for an empty
    /// or overflowing geometry.
    pub fn expected_raw_size(&self) -> Option<u64> {
        if self.sensor_width == 0 || self.sensor_height == 0 {
            return None;
        }
        let samples = (self.sensor_width as usize).checked_mul(self.sensor_height as usize)?;
        packed_len(samples).map(|n| n as u64)
    }

    /// Requested resolution.
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// Sensor identity, if the pattern parses.
    pub fn sensor_info(&self) -> Option<SensorInfo> {
        let filter_pattern = self.filter_pattern.parse().ok()?;
        Some(SensorInfo {
            sensor_width: self.sensor_width,
            sensor_height: self.sensor_height,
            filter_pattern,
        })
    }
}

/// Native geometry and filter layout of an endpoint's sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorInfo {
    pub sensor_width: u32,
    pub sensor_height: u32,
    pub filter_pattern: FilterPattern,
}

impl fmt::Display for SensorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} {}",
            self.sensor_width, self.sensor_height, self.filter_pattern
        )
    }
}

/// Endpoint -> client: transfer finished.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
}

/// Endpoint -> client: the capture failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureFailure {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<u64>,
    pub reason: String,
}
