use camsync_peer::{CancellationToken, FileSource, NodeConfig, NodeServer, Resolution};
use camsync_raw::FilterPattern;

use crate::cmd::{runtime, ServeArgs};
use crate::exit::{io_error, raw_error, resolution_error, CliError, CliResult, SUCCESS};

pub fn run(args: ServeArgs) -> CliResult<i32> {
    let sensor: Resolution = args.sensor.parse().map_err(resolution_error)?;
    let pattern: FilterPattern = args
        .pattern
        .parse()
        .map_err(|err| raw_error("--pattern", err))?;
    if args.chunk_size == 0 {
        return Err(CliError::usage("--chunk-size must be greater than zero"));
    }
    if !args.file.is_file() {
        return Err(CliError::usage(format!(
            "capture file not found: {}",
            args.file.display()
        )));
    }

    let source = FileSource::new(&args.file, sensor.width, sensor.height, pattern)
        .isolate(args.isolate.map(Into::into));
    let mut config = NodeConfig {
        chunk_size: args.chunk_size,
        capture_dir: args.capture_dir.clone(),
        ..NodeConfig::default()
    };
    if let Some(node_id) = &args.node_id {
        config.node_id = node_id.clone();
    }

    let rt = runtime()?;
    rt.block_on(async move {
        let server = NodeServer::bind(&args.bind, source, config)
            .await
            .map_err(|err| io_error("bind failed", err))?;
        let local = server
            .local_addr()
            .map_err(|err| io_error("local address", err))?;
        tracing::info!(
            address = %local,
            file = %args.file.display(),
            sensor = %sensor,
            pattern = %pattern,
            "serving captures"
        );

        let shutdown = CancellationToken::new();
        let on_signal = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutting down");
                on_signal.cancel();
            }
        });

        server
            .serve_until(shutdown)
            .await
            .map_err(|err| io_error("serve failed", err))
    })?;

    Ok(SUCCESS)
}
