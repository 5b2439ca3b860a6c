//! Color-filter patterns and transfer format tags.

use std::fmt;
use std::str::FromStr;

use crate::error::RawError;

/// One of the four 2x2 Bayer tilings, named by reading the tile row-major
/// from the top-left cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CfaPattern {
    Rggb,
    Bggr,
    Grbg,
    Gbrg,
}

/// A filter color within a Bayer tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CfaColor {
    Red,
    Green,
    Blue,
}

impl CfaPattern {
    /// The canonical four-letter name.
    pub fn as_str(self) -> &'static str {
        match self {
            CfaPattern::Rggb => "RGGB",
            CfaPattern::Bggr => "BGGR",
            CfaPattern::Grbg => "GRBG",
            CfaPattern::Gbrg => "GBRG",
        }
    }

    /// Tile offsets `(row, col)` of the red cell, the two green cells, and
    /// the blue cell.
    pub fn cells(self) -> TileCells {
        match self {
            CfaPattern::Rggb => TileCells {
                red: (0, 0),
                green: [(0, 1), (1, 0)],
                blue: (1, 1),
            },
            CfaPattern::Bggr => TileCells {
                red: (1, 1),
                green: [(0, 1), (1, 0)],
                blue: (0, 0),
            },
            CfaPattern::Grbg => TileCells {
                red: (0, 1),
                green: [(0, 0), (1, 1)],
                blue: (1, 0),
            },
            CfaPattern::Gbrg => TileCells {
                red: (1, 0),
                green: [(0, 0), (1, 1)],
                blue: (0, 1),
            },
        }
    }
}

impl fmt::Display for CfaPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cell positions inside one 2x2 tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileCells {
    pub red: (usize, usize),
    pub green: [(usize, usize); 2],
    pub blue: (usize, usize),
}

/// The filter layout an endpoint declares for its transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterPattern {
    /// Full Bayer mosaic; reconstructed to three channels.
    Bayer(CfaPattern),
    /// Single-channel data (monochrome sensor, or one filter plane already
    /// isolated by the endpoint); passed through unchanged.
    Mono,
}

impl FilterPattern {
    pub fn as_str(self) -> &'static str {
        match self {
            FilterPattern::Bayer(cfa) => cfa.as_str(),
            FilterPattern::Mono => "none",
        }
    }
}

impl fmt::Display for FilterPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterPattern {
    type Err = RawError;

    /// Accepts libcamera-style mode names such as `RGGB10_CSI2P`: the
    /// leading tile name decides the pattern.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let upper = trimmed.to_ascii_uppercase();
        if upper.is_empty() || upper == "NONE" || upper == "MONO" {
            return Ok(FilterPattern::Mono);
        }

        let cfa = if upper.starts_with("RGGB") {
            CfaPattern::Rggb
        } else if upper.starts_with("BGGR") {
            CfaPattern::Bggr
        } else if upper.starts_with("GRBG") {
            CfaPattern::Grbg
        } else if upper.starts_with("GBRG") {
            CfaPattern::Gbrg
        } else {
            return Err(RawError::UnsupportedPattern(trimmed.to_string()));
        };
        Ok(FilterPattern::Bayer(cfa))
    }
}

/// The payload format of a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FormatTag {
    /// Packed 10-bit sensor dump.
    Raw,
    /// An already-encoded file (jpg, png, dng); carried opaquely.
    Encoded(String),
}

impl FormatTag {
    pub fn as_str(&self) -> &str {
        match self {
            FormatTag::Raw => "raw",
            FormatTag::Encoded(ext) => ext,
        }
    }

    pub fn is_raw(&self) -> bool {
        matches!(self, FormatTag::Raw)
    }

    /// File extension used when a transfer is persisted.
    pub fn extension(&self) -> &str {
        self.as_str()
    }
}

impl fmt::Display for FormatTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormatTag {
    type Err = RawError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.as_str() {
            "raw" | "native-raw" => Ok(FormatTag::Raw),
            "jpg" | "jpeg" | "png" | "dng" | "encoded" => Ok(FormatTag::Encoded(lower)),
            _ => Err(RawError::UnsupportedFormat(s.trim().to_string())),
        }
    }
}
