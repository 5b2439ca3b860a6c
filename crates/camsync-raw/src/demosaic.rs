//! Half-resolution Bayer reconstruction.
//!
//! Every 2x2 tile becomes one RGB pixel: red and blue are sampled directly,
//! green is the integer mean of the tile's two green cells. A trailing odd
//! row or column has no complete tile and is dropped.

use crate::image::ReconstructedImage;
use crate::pattern::{CfaColor, CfaPattern, FilterPattern};
use crate::unpack::SampleGrid;

/// Reconstruct a displayable image from an unpacked grid.
///
/// [`FilterPattern::Mono`] passes the grid through as a single channel.
pub fn demosaic(grid: &SampleGrid, pattern: FilterPattern) -> ReconstructedImage {
    match pattern {
        FilterPattern::Mono => ReconstructedImage::assemble(
            grid.width(),
            grid.height(),
            1,
            grid.samples().to_vec(),
        ),
        FilterPattern::Bayer(cfa) => demosaic_bayer(grid, cfa),
    }
}

fn demosaic_bayer(grid: &SampleGrid, cfa: CfaPattern) -> ReconstructedImage {
    let out_w = grid.width() / 2;
    let out_h = grid.height() / 2;
    let cells = cfa.cells();

    let mut samples = Vec::with_capacity(out_w * out_h * 3);
    for ty in 0..out_h {
        let y = ty * 2;
        for tx in 0..out_w {
            let x = tx * 2;
            let at = |(dy, dx): (usize, usize)| grid.get(x + dx, y + dy);

            let red = at(cells.red);
            let g0 = u32::from(at(cells.green[0]));
            let g1 = u32::from(at(cells.green[1]));
            let green = ((g0 + g1) / 2) as u16;
            let blue = at(cells.blue);
            samples.extend_from_slice(&[red, green, blue]);
        }
    }

    ReconstructedImage::assemble(out_w, out_h, 3, samples)
}

/// Extract one filter color's sub-sampled plane (half resolution).
///
/// For [`CfaColor::Green`] the green cell on the tile's top row is used.
pub fn isolate_plane(grid: &SampleGrid, cfa: CfaPattern, color: CfaColor) -> SampleGrid {
    let cells = cfa.cells();
    let (dy, dx) = match color {
        CfaColor::Red => cells.red,
        CfaColor::Blue => cells.blue,
        CfaColor::Green => {
            if cells.green[0].0 == 0 {
                cells.green[0]
            } else {
                cells.green[1]
            }
        }
    };

    let out_w = grid.width() / 2;
    let out_h = grid.height() / 2;
    let mut samples = Vec::with_capacity(out_w * out_h);
    for ty in 0..out_h {
        for tx in 0..out_w {
            samples.push(grid.get(tx * 2 + dx, ty * 2 + dy));
        }
    }

    SampleGrid::assemble(out_w, out_h, samples)
}
