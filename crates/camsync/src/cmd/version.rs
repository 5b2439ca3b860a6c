use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("camsync {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: camsync");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("CAMSYNC_BUILD_TARGET").unwrap_or("unknown")
    );
    println!(
        "profile: {}",
        option_env!("CAMSYNC_BUILD_PROFILE").unwrap_or("unknown")
    );
    println!("git_hash: {}", option_env!("GIT_HASH").unwrap_or("unknown"));
    println!(
        "protocol: frame magic \"CS\", events {}..={}",
        camsync_frame::CAPTURE_REQUEST,
        camsync_frame::CAPTURE_ERROR
    );
    println!(
        "defaults: resolution={}, format={}, chunk_size={}",
        camsync_peer::DEFAULT_RESOLUTION,
        camsync_peer::DEFAULT_FORMAT,
        camsync_peer::DEFAULT_CHUNK_SIZE
    );

    Ok(SUCCESS)
}
