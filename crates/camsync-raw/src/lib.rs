//! Raw sensor reconstruction for camsync.
//!
//! Turns a packed 10-bit sensor dump into a displayable image:
//! - [`unpack`] expands the 5-byte/4-sample layout into a [`SampleGrid`]
//! - [`SampleGrid::crop_or_pad`] applies the requested resolution (top-left anchored)
//! - [`demosaic`] reconstructs RGB from a Bayer tiling, or passes single-channel data through
//!
//! [`reconstruct`] runs the whole pipeline.

pub mod demosaic;
pub mod error;
pub mod image;
pub mod pattern;
pub mod unpack;

pub use demosaic::{demosaic, isolate_plane};
pub use error::{RawError, Result};
pub use image::ReconstructedImage;
pub use pattern::{CfaColor, CfaPattern, FilterPattern, FormatTag, TileCells};
pub use unpack::{pack10, packed_len, unpack10, SampleGrid, SAMPLE_MAX};

/// Inputs for [`reconstruct`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconstructParams {
    /// Width of the packed dump, in samples.
    pub sensor_width: usize,
    /// Height of the packed dump, in samples.
    pub sensor_height: usize,
    /// Requested width; the grid is cropped or zero-padded to this.
    pub width: usize,
    /// Requested height.
    pub height: usize,
    pub pattern: FilterPattern,
    /// Rotate the result by 180 degrees.
    pub rotate_180: bool,
}

/// Unpack, crop/pad, demosaic and optionally rotate a packed raw buffer.
pub fn reconstruct(buf: &[u8], params: &ReconstructParams) -> Result<ReconstructedImage> {
    if params.width == 0 || params.height == 0 {
        return Err(RawError::InvalidDimensions {
            width: params.width,
            height: params.height,
        });
    }

    let grid = SampleGrid::from_packed(buf, params.sensor_width, params.sensor_height)?;
    let grid = grid.crop_or_pad(params.width, params.height)?;
    let mut image = demosaic(&grid, params.pattern);
    if params.rotate_180 {
        image.rotate_180();
    }

    tracing::debug!(
        sensor = %format_args!("{}x{}", params.sensor_width, params.sensor_height),
        width = image.width(),
        height = image.height(),
        channels = image.channels(),
        pattern = %params.pattern,
        "reconstructed image"
    );
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(pattern: FilterPattern) -> ReconstructParams {
        ReconstructParams {
            sensor_width: 4,
            sensor_height: 4,
            width: 4,
            height: 4,
            pattern,
            rotate_180: false,
        }
    }

    #[test]
    fn full_pipeline_rggb() {
        let samples: Vec<u16> = (0..16).map(|i| i * 60).collect();
        let packed = pack10(&samples);

        let image = reconstruct(&packed, &params(FilterPattern::Bayer(CfaPattern::Rggb))).unwrap();
        assert_eq!((image.width(), image.height(), image.channels()), (2, 2, 3));
        // tile (0,0): r = s[0], g = (s[1] + s[4]) / 2, b = s[5]
        assert_eq!(image.pixel(0, 0), &[0, 150, 300]);
    }

    #[test]
    fn crop_before_demosaic() {
        let samples: Vec<u16> = (0..16).collect();
        let packed = pack10(&samples);
        let p = ReconstructParams {
            width: 2,
            height: 2,
            ..params(FilterPattern::Mono)
        };
        let image = reconstruct(&packed, &p).unwrap();
        assert_eq!(image.samples(), &[0, 1, 4, 5]);
    }

    #[test]
    fn pad_beyond_sensor() {
        let packed = pack10(&[7u16; 4]);
        let p = ReconstructParams {
            sensor_width: 2,
            sensor_height: 2,
            width: 3,
            height: 2,
            pattern: FilterPattern::Mono,
            rotate_180: false,
        };
        let image = reconstruct(&packed, &p).unwrap();
        assert_eq!(image.samples(), &[7, 7, 0, 7, 7, 0]);
    }

    #[test]
    fn rotation_is_a_post_step() {
        let packed = pack10(&[1, 2, 3, 4]);
        let p = ReconstructParams {
            sensor_width: 2,
            sensor_height: 2,
            width: 2,
            height: 2,
            pattern: FilterPattern::Mono,
            rotate_180: true,
        };
        let image = reconstruct(&packed, &p).unwrap();
        assert_eq!(image.samples(), &[4, 3, 2, 1]);
    }

    #[test]
    fn size_checked_before_crop() {
        let packed = vec![0u8; 19];
        let err = reconstruct(&packed, &params(FilterPattern::Mono)).unwrap_err();
        assert_eq!(
            err,
            RawError::SizeMismatch {
                expected: 20,
                actual: 19
            }
        );
    }
}
