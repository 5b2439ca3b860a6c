use camsync_peer::Resolution;
use camsync_raw::{reconstruct, FilterPattern, ReconstructParams, ReconstructedImage};

use crate::cmd::InspectArgs;
use crate::exit::{io_error, raw_error, resolution_error, CliResult, SUCCESS};
use crate::output::{print_inspect, ChannelStats, ImageOutput, InspectOutput, OutputFormat};

pub fn run(args: InspectArgs, format: OutputFormat) -> CliResult<i32> {
    let sensor: Resolution = args.sensor.parse().map_err(resolution_error)?;
    let resolution = match args.resolution.as_deref() {
        Some(r) => r.parse().map_err(resolution_error)?,
        None => sensor,
    };
    let pattern: FilterPattern = args
        .pattern
        .parse()
        .map_err(|err| raw_error("--pattern", err))?;

    let data = std::fs::read(&args.file)
        .map_err(|err| io_error(&format!("read {}", args.file.display()), err))?;
    let params = ReconstructParams {
        sensor_width: sensor.width as usize,
        sensor_height: sensor.height as usize,
        width: resolution.width as usize,
        height: resolution.height as usize,
        pattern,
        rotate_180: args.rotate_180,
    };
    let image = reconstruct(&data, &params)
        .map_err(|err| raw_error(&format!("reconstruct {}", args.file.display()), err))?;

    let out = InspectOutput {
        file: args.file.display().to_string(),
        sensor: sensor.to_string(),
        pattern: pattern.as_str(),
        image: ImageOutput {
            width: image.width(),
            height: image.height(),
            channels: image.channels(),
        },
        rotated: args.rotate_180,
        channels: channel_stats(&image),
    };
    print_inspect(&out, format);
    Ok(SUCCESS)
}

fn channel_stats(image: &ReconstructedImage) -> Vec<ChannelStats> {
    let names: &[&'static str] = if image.channels() == 3 {
        &["r", "g", "b"]
    } else {
        &["y"]
    };
    let pixels = image.width() * image.height();

    let mut sums = vec![0u64; image.channels()];
    for px in image.samples().chunks_exact(image.channels()) {
        for (sum, &v) in sums.iter_mut().zip(px) {
            *sum += u64::from(v);
        }
    }

    image
        .channel_range()
        .into_iter()
        .zip(sums)
        .enumerate()
        .map(|(i, ((min, max), sum))| ChannelStats {
            channel: names.get(i).copied().unwrap_or("?"),
            min,
            max,
            mean: if pixels == 0 {
                0.0
            } else {
                sum as f64 / pixels as f64
            },
        })
        .collect()
}
