use crate::error::{RawError, Result};

/// A reconstructed image with interleaved channels.
///
/// Samples keep the sensor's 10-bit range; nothing is rescaled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconstructedImage {
    width: usize,
    height: usize,
    channels: usize,
    samples: Vec<u16>,
}

impl ReconstructedImage {
    /// Build an image from interleaved samples.
    pub fn from_samples(
        width: usize,
        height: usize,
        channels: usize,
        samples: Vec<u16>,
    ) -> Result<Self> {
        if channels != 1 && channels != 3 {
            return Err(RawError::InvalidDimensions {
                width: width.saturating_mul(channels),
                height,
            });
        }
        let expected = width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(channels))
            .ok_or(RawError::InvalidDimensions { width, height })?;
        if samples.len() != expected {
            return Err(RawError::SizeMismatch {
                expected,
                actual: samples.len(),
            });
        }
        Ok(Self::assemble(width, height, channels, samples))
    }

    pub(crate) fn assemble(width: usize, height: usize, channels: usize, samples: Vec<u16>) -> Self {
        debug_assert_eq!(samples.len(), width * height * channels);
        Self {
            width,
            height,
            channels,
            samples,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// 1 for single-channel intensity, 3 for RGB.
    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn samples(&self) -> &[u16] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<u16> {
        self.samples
    }

    /// All channel values of the pixel at column `x`, row `y`.
    pub fn pixel(&self, x: usize, y: usize) -> &[u16] {
        let start = (y * self.width + x) * self.channels;
        &self.samples[start..start + self.channels]
    }

    /// Rotate by 180 degrees in place (for endpoints mounted upside down).
    pub fn rotate_180(&mut self) {
        if self.channels == 1 {
            self.samples.reverse();
            return;
        }
        // Reverse pixel order while keeping each pixel's channel order intact.
        let mut rotated = Vec::with_capacity(self.samples.len());
        for px in self.samples.chunks_exact(self.channels).rev() {
            rotated.extend_from_slice(px);
        }
        self.samples = rotated;
    }

    /// Minimum and maximum sample per channel.
    pub fn channel_range(&self) -> Vec<(u16, u16)> {
        let mut ranges = vec![(u16::MAX, 0u16); self.channels];
        for px in self.samples.chunks_exact(self.channels) {
            for (range, &v) in ranges.iter_mut().zip(px) {
                range.0 = range.0.min(v);
                range.1 = range.1.max(v);
            }
        }
        if self.samples.is_empty() {
            ranges.iter_mut().for_each(|r| *r = (0, 0));
        }
        ranges
    }
}
