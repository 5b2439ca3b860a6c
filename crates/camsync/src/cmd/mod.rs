use clap::{Args, Subcommand, ValueEnum};
use std::path::PathBuf;

use camsync_raw::CfaColor;

use crate::exit::{io_error, CliResult};
use crate::output::OutputFormat;

pub mod capture;
pub mod inspect;
pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Capture one synchronized frame from every endpoint.
    Capture(CaptureArgs),
    /// Run a file-backed endpoint node.
    Serve(ServeArgs),
    /// Reconstruct a local raw file and print image statistics.
    Inspect(InspectArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Capture(args) => capture::run(args, format),
        Command::Serve(args) => serve::run(args),
        Command::Inspect(args) => inspect::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

pub(crate) fn runtime() -> CliResult<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("tokio runtime", err))
}

#[derive(Args, Debug)]
pub struct CaptureArgs {
    /// Endpoint list and defaults (JSON).
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
    /// Endpoint as id=host:port, suffixed with :rotate for upside-down cameras. Repeatable.
    #[arg(long = "endpoint", short = 'e', value_name = "ENDPOINT")]
    pub endpoints: Vec<String>,
    /// Requested resolution (e.g. 2304x1296).
    #[arg(long)]
    pub resolution: Option<String>,
    /// Requested capture format.
    #[arg(long, value_name = "FORMAT")]
    pub capture_format: Option<String>,
    /// Connection timeout (e.g. 5s, 500ms).
    #[arg(long)]
    pub connect_timeout: Option<String>,
    /// Wait for metadata after the request.
    #[arg(long)]
    pub metadata_timeout: Option<String>,
    /// Wait between chunks.
    #[arg(long)]
    pub chunk_timeout: Option<String>,
    /// Wait for the completion signal after the last chunk.
    #[arg(long)]
    pub completion_timeout: Option<String>,
    /// Bound on the whole capture.
    #[arg(long)]
    pub timeout: Option<String>,
    /// Write each captured frame and a JSON metadata sidecar here.
    #[arg(long, value_name = "DIR")]
    pub save_dir: Option<PathBuf>,
    /// Skip raw reconstruction.
    #[arg(long)]
    pub no_reconstruct: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum IsolateColor {
    Red,
    Green,
    Blue,
}

impl From<IsolateColor> for CfaColor {
    fn from(color: IsolateColor) -> Self {
        match color {
            IsolateColor::Red => CfaColor::Red,
            IsolateColor::Green => CfaColor::Green,
            IsolateColor::Blue => CfaColor::Blue,
        }
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on.
    #[arg(long, env = "CAMSYNC_BIND", default_value = "0.0.0.0:5001")]
    pub bind: String,
    /// Node identifier reported in metadata. Default: camera_node_<pid>.
    #[arg(long, env = "NODE_ID")]
    pub node_id: Option<String>,
    /// Packed 10-bit sensor dump served for every request.
    #[arg(long, value_name = "FILE")]
    pub file: PathBuf,
    /// Sensor dimensions of the file (WxH).
    #[arg(long, default_value = "2304x1296")]
    pub sensor: String,
    /// Color filter pattern of the file.
    #[arg(long, default_value = "RGGB")]
    pub pattern: String,
    /// Serve only one filter color's plane, single-channel at half resolution.
    #[arg(long)]
    pub isolate: Option<IsolateColor>,
    /// Chunk size in bytes.
    #[arg(long, default_value = "65536")]
    pub chunk_size: usize,
    /// Also write every capture to this directory.
    #[arg(long, value_name = "DIR")]
    pub capture_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Packed 10-bit sensor dump.
    pub file: PathBuf,
    /// Sensor dimensions of the file (WxH).
    #[arg(long, default_value = "2304x1296")]
    pub sensor: String,
    /// Color filter pattern of the file.
    #[arg(long, default_value = "RGGB")]
    pub pattern: String,
    /// Output resolution. Default: the sensor dimensions.
    #[arg(long)]
    pub resolution: Option<String>,
    /// Rotate the reconstructed image by 180 degrees.
    #[arg(long)]
    pub rotate_180: bool,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
