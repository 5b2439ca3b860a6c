//! Packed 10-bit sample layout.
//!
//! Four samples occupy five bytes, MSB-first across the group:
//!
//! ```text
//! byte:   b0        b1        b2        b3        b4
//! bits:   s0[9:2]   s0[1:0]   s1[3:0]   s2[5:0]   s3[7:0]
//!                   s1[9:4]   s2[9:6]   s3[9:8]
//! ```

use crate::error::{RawError, Result};

/// Largest value a 10-bit sample can hold.
pub const SAMPLE_MAX: u16 = 0x3FF;

/// Bytes per group of four packed samples.
pub const GROUP_BYTES: usize = 5;

/// Samples per packed group.
pub const GROUP_SAMPLES: usize = 4;

/// Number of bytes needed to pack `samples` 10-bit values: `ceil(samples * 10 / 8)`.
pub fn packed_len(samples: usize) -> Option<usize> {
    samples.checked_mul(10).map(|bits| bits.div_ceil(8))
}

#[inline]
fn unpack_group(g: &[u8; GROUP_BYTES]) -> [u16; GROUP_SAMPLES] {
    let b = g.map(u16::from);
    [
        ((b[0] << 2) | (b[1] >> 6)) & SAMPLE_MAX,
        ((b[1] << 4) | (b[2] >> 4)) & SAMPLE_MAX,
        ((b[2] << 6) | (b[3] >> 2)) & SAMPLE_MAX,
        ((b[3] << 8) | b[4]) & SAMPLE_MAX,
    ]
}

#[inline]
fn pack_group(s: &[u16; GROUP_SAMPLES]) -> [u8; GROUP_BYTES] {
    let s = s.map(|v| v & SAMPLE_MAX);
    [
        (s[0] >> 2) as u8,
        (((s[0] & 0x03) << 6) | (s[1] >> 4)) as u8,
        (((s[1] & 0x0F) << 4) | (s[2] >> 6)) as u8,
        (((s[2] & 0x3F) << 2) | (s[3] >> 8)) as u8,
        (s[3] & 0xFF) as u8,
    ]
}

/// Expand a packed buffer into exactly `samples` 10-bit values.
///
/// The buffer length must equal [`packed_len`] of `samples`; anything else is a
/// [`RawError::SizeMismatch`]. A trailing partial group decodes as if padded
/// with zero bytes.
pub fn unpack10(buf: &[u8], samples: usize) -> Result<Vec<u16>> {
    let expected = packed_len(samples).ok_or(RawError::InvalidDimensions {
        width: samples,
        height: 1,
    })?;
    if buf.len() != expected {
        return Err(RawError::SizeMismatch {
            expected,
            actual: buf.len(),
        });
    }

    let mut out = Vec::with_capacity(samples);
    let mut groups = buf.chunks_exact(GROUP_BYTES);
    for group in groups.by_ref() {
        let mut g = [0u8; GROUP_BYTES];
        g.copy_from_slice(group);
        out.extend_from_slice(&unpack_group(&g));
    }

    let tail = groups.remainder();
    if !tail.is_empty() {
        let mut g = [0u8; GROUP_BYTES];
        g[..tail.len()].copy_from_slice(tail);
        let decoded = unpack_group(&g);
        let missing = samples - out.len();
        out.extend_from_slice(&decoded[..missing]);
    }

    Ok(out)
}

/// Pack 10-bit values into the wire layout; the inverse of [`unpack10`].
///
/// Bits above the low ten of each sample are discarded.
pub fn pack10(samples: &[u16]) -> Vec<u8> {
    let len = samples.len().saturating_mul(10).div_ceil(8);
    let mut out = Vec::with_capacity(len + GROUP_BYTES);

    let mut groups = samples.chunks_exact(GROUP_SAMPLES);
    for group in groups.by_ref() {
        let mut s = [0u16; GROUP_SAMPLES];
        s.copy_from_slice(group);
        out.extend_from_slice(&pack_group(&s));
    }

    let tail = groups.remainder();
    if !tail.is_empty() {
        let mut s = [0u16; GROUP_SAMPLES];
        s[..tail.len()].copy_from_slice(tail);
        out.extend_from_slice(&pack_group(&s));
    }

    out.truncate(len);
    out
}

/// A row-major grid of unpacked samples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleGrid {
    width: usize,
    height: usize,
    samples: Vec<u16>,
}

impl SampleGrid {
    /// Wrap `samples` as a `width x height` grid.
    pub fn new(width: usize, height: usize, samples: Vec<u16>) -> Result<Self> {
        match width.checked_mul(height) {
            Some(n) if n == samples.len() => Ok(Self {
                width,
                height,
                samples,
            }),
            Some(n) => Err(RawError::SizeMismatch {
                expected: n,
                actual: samples.len(),
            }),
            None => Err(RawError::InvalidDimensions { width, height }),
        }
    }

    /// Unpack a sensor dump of `width x height` samples.
    pub fn from_packed(buf: &[u8], width: usize, height: usize) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(RawError::InvalidDimensions { width, height });
        }
        let count = width
            .checked_mul(height)
            .ok_or(RawError::InvalidDimensions { width, height })?;
        let samples = unpack10(buf, count)?;
        Ok(Self {
            width,
            height,
            samples,
        })
    }

    pub(crate) fn assemble(width: usize, height: usize, samples: Vec<u16>) -> Self {
        debug_assert_eq!(samples.len(), width * height);
        Self {
            width,
            height,
            samples,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn samples(&self) -> &[u16] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<u16> {
        self.samples
    }

    /// Sample at column `x`, row `y`.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u16 {
        self.samples[y * self.width + x]
    }

    pub fn row(&self, y: usize) -> &[u16] {
        &self.samples[y * self.width..(y + 1) * self.width]
    }

    /// Take the top-left `width x height` region, zero-filling whatever lies
    /// outside the source grid.
    ///
    /// Fails with [`RawError::InvalidDimensions`] if the region overflows or
    /// cannot be allocated.
    pub fn crop_or_pad(&self, width: usize, height: usize) -> Result<SampleGrid> {
        if width == self.width && height == self.height {
            return Ok(self.clone());
        }

        let count = width
            .checked_mul(height)
            .ok_or(RawError::InvalidDimensions { width, height })?;
        let mut samples: Vec<u16> = Vec::new();
        samples
            .try_reserve_exact(count)
            .map_err(|_| RawError::InvalidDimensions { width, height })?;
        samples.resize(count, 0);
        let copy_w = width.min(self.width);
        for y in 0..height.min(self.height) {
            let dst = &mut samples[y * width..y * width + copy_w];
            dst.copy_from_slice(&self.row(y)[..copy_w]);
        }

        Ok(SampleGrid {
            width,
            height,
            samples,
        })
    }
}
