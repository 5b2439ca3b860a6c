use std::io::IsTerminal;
use std::path::PathBuf;

use camsync_peer::{CaptureResult, CaptureSet, CapturedFrame};
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct CaptureSetOutput<'a> {
    timestamp: &'a str,
    captured: usize,
    endpoints: usize,
    results: Vec<EndpointOutput<'a>>,
}

#[derive(Serialize)]
struct EndpointOutput<'a> {
    endpoint: &'a str,
    address: &'a str,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    filename: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<ImageOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    timing: Option<TimingOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    saved: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_kind: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Per-endpoint durations in milliseconds.
#[derive(Serialize, Clone, Copy)]
pub struct TimingOutput {
    pub transfer_ms: u64,
    pub processing_ms: u64,
    pub total_ms: u64,
}

impl TimingOutput {
    pub fn of(frame: &CapturedFrame) -> Self {
        Self {
            transfer_ms: frame.transfer_time.as_millis() as u64,
            processing_ms: frame.processing_time.as_millis() as u64,
            total_ms: frame.total_time().as_millis() as u64,
        }
    }
}

#[derive(Serialize)]
pub struct ImageOutput {
    pub width: usize,
    pub height: usize,
    pub channels: usize,
}

/// Print a capture set. `saved[i]` is where result `i` was written, if anywhere.
pub fn print_capture_set(set: &CaptureSet, saved: &[Option<PathBuf>], format: OutputFormat) {
    let rows: Vec<EndpointOutput<'_>> = set
        .results
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let saved = saved
                .get(i)
                .and_then(|p| p.as_ref())
                .map(|p| p.display().to_string());
            match &r.result {
                CaptureResult::Captured(frame) => EndpointOutput {
                    endpoint: &r.endpoint_id,
                    address: &r.address,
                    status: "captured",
                    filename: Some(frame.metadata.filename.as_str()),
                    bytes: Some(frame.data.len() as u64),
                    format: Some(frame.format.as_str()),
                    image: frame.image.as_ref().map(|img| ImageOutput {
                        width: img.width(),
                        height: img.height(),
                        channels: img.channels(),
                    }),
                    timing: Some(TimingOutput::of(frame)),
                    saved,
                    error_kind: None,
                    error: None,
                },
                CaptureResult::Failed(err) => EndpointOutput {
                    endpoint: &r.endpoint_id,
                    address: &r.address,
                    status: "failed",
                    filename: None,
                    bytes: None,
                    format: None,
                    image: None,
                    timing: None,
                    saved: None,
                    error_kind: Some(err.kind()),
                    error: Some(err.to_string()),
                },
            }
        })
        .collect();

    match format {
        OutputFormat::Json => {
            let out = CaptureSetOutput {
                timestamp: &set.timestamp,
                captured: set.captured_count(),
                endpoints: set.len(),
                results: rows,
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![
                    "ENDPOINT", "ADDRESS", "STATUS", "BYTES", "IMAGE", "TRANSFER", "PROCESS",
                    "DETAIL",
                ]);
            for row in &rows {
                let image = row
                    .image
                    .as_ref()
                    .map(|i| format!("{}x{}x{}", i.width, i.height, i.channels))
                    .unwrap_or_else(|| "-".to_string());
                let detail = row
                    .error
                    .clone()
                    .or_else(|| row.saved.clone())
                    .or_else(|| row.filename.map(str::to_string))
                    .unwrap_or_default();
                table.add_row(vec![
                    row.endpoint.to_string(),
                    row.address.to_string(),
                    row.status.to_string(),
                    row.bytes.map(|b| b.to_string()).unwrap_or_else(|| "-".to_string()),
                    image,
                    row.timing
                        .map(|t| format!("{}ms", t.transfer_ms))
                        .unwrap_or_else(|| "-".to_string()),
                    row.timing
                        .map(|t| format!("{}ms", t.processing_ms))
                        .unwrap_or_else(|| "-".to_string()),
                    detail,
                ]);
            }
            println!("capture {} ({}/{} captured)", set.timestamp, set.captured_count(), set.len());
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "capture timestamp={} captured={}/{}",
                set.timestamp,
                set.captured_count(),
                set.len()
            );
            for row in &rows {
                match &row.error {
                    Some(err) => println!(
                        "  {} ({}) failed [{}]: {}",
                        row.endpoint,
                        row.address,
                        row.error_kind.unwrap_or("error"),
                        err
                    ),
                    None => println!(
                        "  {} ({}) captured {} bytes{}{}{}",
                        row.endpoint,
                        row.address,
                        row.bytes.unwrap_or(0),
                        row.image
                            .as_ref()
                            .map(|i| format!(" image={}x{}x{}", i.width, i.height, i.channels))
                            .unwrap_or_default(),
                        row.timing
                            .map(|t| format!(
                                " transfer={}ms process={}ms total={}ms",
                                t.transfer_ms, t.processing_ms, t.total_ms
                            ))
                            .unwrap_or_default(),
                        row.saved
                            .as_ref()
                            .map(|p| format!(" saved={p}"))
                            .unwrap_or_default()
                    ),
                }
            }
        }
    }
}

/// Per-channel statistics of a reconstructed image.
#[derive(Serialize)]
pub struct ChannelStats {
    pub channel: &'static str,
    pub min: u16,
    pub max: u16,
    pub mean: f64,
}

#[derive(Serialize)]
pub struct InspectOutput<'a> {
    pub file: String,
    pub sensor: String,
    pub pattern: &'a str,
    pub image: ImageOutput,
    pub rotated: bool,
    pub channels: Vec<ChannelStats>,
}

pub fn print_inspect(out: &InspectOutput<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string(out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CHANNEL", "MIN", "MAX", "MEAN"]);
            for c in &out.channels {
                table.add_row(vec![
                    c.channel.to_string(),
                    c.min.to_string(),
                    c.max.to_string(),
                    format!("{:.1}", c.mean),
                ]);
            }
            println!(
                "{}: sensor {} {} -> {}x{}x{}",
                out.file,
                out.sensor,
                out.pattern,
                out.image.width,
                out.image.height,
                out.image.channels
            );
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "file={} sensor={} pattern={} image={}x{}x{} rotated={}",
                out.file,
                out.sensor,
                out.pattern,
                out.image.width,
                out.image.height,
                out.image.channels,
                out.rotated
            );
            for c in &out.channels {
                println!("  {}: min={} max={} mean={:.1}", c.channel, c.min, c.max, c.mean);
            }
        }
    }
}
