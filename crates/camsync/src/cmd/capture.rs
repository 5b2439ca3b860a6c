use std::path::{Path, PathBuf};

use camsync_peer::{
    CancellationToken, CaptureCoordinator, CaptureResult, CaptureSet, CapturedFrame, FrameMetadata,
    Resolution,
};
use serde::Serialize;

use crate::cmd::{runtime, CaptureArgs};
use crate::config::{parse_endpoint_arg, parse_optional_duration, CaptureFile, Overrides};
use crate::exit::{coordinator_error, io_error, resolution_error, CliResult, FAILURE, SUCCESS};
use crate::output::{print_capture_set, ImageOutput, OutputFormat, TimingOutput};

#[derive(Serialize)]
struct Sidecar<'a> {
    endpoint: &'a str,
    timestamp: &'a str,
    file: String,
    metadata: &'a FrameMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<ImageOutput>,
    timing: TimingOutput,
}

pub fn run(args: CaptureArgs, format: OutputFormat) -> CliResult<i32> {
    let file = match &args.config {
        Some(path) => CaptureFile::load(path)?,
        None => CaptureFile::default(),
    };
    let overrides = Overrides {
        endpoints: args
            .endpoints
            .iter()
            .map(|e| parse_endpoint_arg(e))
            .collect::<CliResult<_>>()?,
        resolution: args
            .resolution
            .as_deref()
            .map(str::parse::<Resolution>)
            .transpose()
            .map_err(resolution_error)?,
        format: args.capture_format.clone(),
        connect_timeout: parse_optional_duration(args.connect_timeout.as_deref())?,
        metadata_timeout: parse_optional_duration(args.metadata_timeout.as_deref())?,
        chunk_timeout: parse_optional_duration(args.chunk_timeout.as_deref())?,
        completion_timeout: parse_optional_duration(args.completion_timeout.as_deref())?,
        overall_timeout: parse_optional_duration(args.timeout.as_deref())?,
        reconstruct: !args.no_reconstruct,
    };
    let (endpoints, config) = file.resolve(overrides)?;
    let coordinator = CaptureCoordinator::new(endpoints, config).map_err(coordinator_error)?;

    let rt = runtime()?;
    let set = rt.block_on(async {
        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, cancelling capture");
                on_signal.cancel();
            }
        });

        coordinator.capture_all_with_cancel(cancel).await
    });

    let saved = match &args.save_dir {
        Some(dir) => save_all(&set, dir)?,
        None => vec![None; set.len()],
    };

    print_capture_set(&set, &saved, format);

    if set.captured_count() == 0 {
        Ok(FAILURE)
    } else {
        Ok(SUCCESS)
    }
}

fn save_all(set: &CaptureSet, dir: &Path) -> CliResult<Vec<Option<PathBuf>>> {
    std::fs::create_dir_all(dir)
        .map_err(|err| io_error(&format!("create {}", dir.display()), err))?;

    set.results
        .iter()
        .map(|r| match &r.result {
            CaptureResult::Captured(frame) => save_frame(frame, &set.timestamp, dir).map(Some),
            CaptureResult::Failed(_) => Ok(None),
        })
        .collect()
}

fn save_frame(frame: &CapturedFrame, timestamp: &str, dir: &Path) -> CliResult<PathBuf> {
    let name = frame.file_name(timestamp);
    let path = dir.join(&name);
    std::fs::write(&path, &frame.data)
        .map_err(|err| io_error(&format!("write {}", path.display()), err))?;

    let sidecar = Sidecar {
        endpoint: &frame.endpoint_id,
        timestamp,
        file: name,
        metadata: &frame.metadata,
        image: frame.image.as_ref().map(|img| ImageOutput {
            width: img.width(),
            height: img.height(),
            channels: img.channels(),
        }),
        timing: TimingOutput::of(frame),
    };
    let sidecar_path = path.with_extension("json");
    let json = serde_json::to_vec_pretty(&sidecar)
        .map_err(|err| io_error("encode sidecar", err.into()))?;
    std::fs::write(&sidecar_path, json)
        .map_err(|err| io_error(&format!("write {}", sidecar_path.display()), err))?;

    tracing::debug!(
        endpoint = %frame.endpoint_id,
        bytes = frame.data.len(),
        path = %path.display(),
        "saved capture"
    );
    Ok(path)
}
