use std::path::Path;
use std::time::Duration;

use camsync_peer::{CoordinatorConfig, Endpoint, Resolution};
use serde::Deserialize;

use crate::exit::{io_error, CliError, CliResult, DATA_INVALID, USAGE};

/// Capture configuration file (`camsync capture --config`).
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaptureFile {
    #[serde(default)]
    pub endpoints: Vec<EndpointEntry>,
    #[serde(default)]
    pub resolution: Option<Resolution>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub timeouts: TimeoutsMs,
    #[serde(default)]
    pub max_transfer_bytes: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointEntry {
    pub id: String,
    pub address: String,
    #[serde(default)]
    pub rotate_180: bool,
}

impl EndpointEntry {
    pub fn to_endpoint(&self) -> Endpoint {
        Endpoint::new(self.id.clone(), self.address.clone()).with_rotate_180(self.rotate_180)
    }
}

/// Timeouts in milliseconds; absent fields keep the library defaults.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimeoutsMs {
    pub connect_ms: Option<u64>,
    pub metadata_ms: Option<u64>,
    pub chunk_ms: Option<u64>,
    pub completion_ms: Option<u64>,
    pub overall_ms: Option<u64>,
}

/// Command-line values that take precedence over the file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub endpoints: Vec<EndpointEntry>,
    pub resolution: Option<Resolution>,
    pub format: Option<String>,
    pub connect_timeout: Option<Duration>,
    pub metadata_timeout: Option<Duration>,
    pub chunk_timeout: Option<Duration>,
    pub completion_timeout: Option<Duration>,
    pub overall_timeout: Option<Duration>,
    pub reconstruct: bool,
}

impl CaptureFile {
    pub fn load(path: &Path) -> CliResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|err| io_error(&format!("read {}", path.display()), err))?;
        Self::parse(&text)
            .map_err(|err| CliError::new(DATA_INVALID, format!("{}: {err}", path.display())))
    }

    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Merge with `overrides` into the endpoint list and coordinator config.
    ///
    /// Endpoints given on the command line replace the file's list.
    pub fn resolve(self, overrides: Overrides) -> CliResult<(Vec<Endpoint>, CoordinatorConfig)> {
        let entries = if overrides.endpoints.is_empty() {
            self.endpoints
        } else {
            overrides.endpoints
        };
        if entries.is_empty() {
            return Err(CliError::usage(
                "no endpoints configured (use --endpoint or --config)",
            ));
        }

        let mut config = CoordinatorConfig::default();
        if let Some(resolution) = overrides.resolution.or(self.resolution) {
            config.resolution = resolution;
        }
        if let Some(format) = overrides.format.or(self.format) {
            config.format = format;
        }

        let t = &self.timeouts;
        let session = &mut config.session;
        if let Some(d) = overrides.connect_timeout.or(t.connect_ms.map(millis)) {
            session.connect_timeout = d;
        }
        if let Some(d) = overrides.metadata_timeout.or(t.metadata_ms.map(millis)) {
            session.metadata_timeout = d;
        }
        if let Some(d) = overrides.chunk_timeout.or(t.chunk_ms.map(millis)) {
            session.chunk_timeout = d;
        }
        if let Some(d) = overrides.completion_timeout.or(t.completion_ms.map(millis)) {
            session.completion_timeout = d;
        }
        if let Some(max) = self.max_transfer_bytes {
            session.max_transfer_size = max;
        }
        config.overall_timeout = overrides.overall_timeout.or(t.overall_ms.map(millis));
        config.reconstruct = overrides.reconstruct;

        Ok((entries.iter().map(EndpointEntry::to_endpoint).collect(), config))
    }
}

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

/// Parse `id=host:port`, optionally suffixed with `:rotate`.
pub fn parse_endpoint_arg(input: &str) -> CliResult<EndpointEntry> {
    let (id, rest) = input
        .split_once('=')
        .ok_or_else(|| CliError::usage(format!("invalid endpoint (want id=host:port): {input}")))?;
    let id = id.trim();
    if id.is_empty() {
        return Err(CliError::usage(format!("endpoint id must not be empty: {input}")));
    }

    let (address, rotate_180) = match rest.strip_suffix(":rotate") {
        Some(address) => (address, true),
        None => (rest, false),
    };
    if address.rsplit_once(':').is_none_or(|(host, port)| {
        host.is_empty() || port.parse::<u16>().is_err()
    }) {
        return Err(CliError::usage(format!(
            "invalid endpoint address (want host:port): {address}"
        )));
    }

    Ok(EndpointEntry {
        id: id.to_string(),
        address: address.to_string(),
        rotate_180,
    })
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

pub fn parse_optional_duration(input: Option<&str>) -> CliResult<Option<Duration>> {
    input.map(parse_duration).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert_eq!(parse_duration("0s").unwrap_err().code, USAGE);
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn endpoint_args() {
        let e = parse_endpoint_arg("cam1=10.0.0.5:5001").expect("plain endpoint should parse");
        assert_eq!(e.id, "cam1");
        assert_eq!(e.address, "10.0.0.5:5001");
        assert!(!e.rotate_180);

        let e = parse_endpoint_arg("cam2=host:5002:rotate").expect("rotated endpoint should parse");
        assert_eq!(e.address, "host:5002");
        assert!(e.rotate_180);

        for bad in ["cam1", "=host:1", "cam=host", "cam=:5001", "cam=host:port"] {
            assert_eq!(parse_endpoint_arg(bad).unwrap_err().code, USAGE, "{bad}");
        }
    }

    #[test]
    fn file_parses_and_command_line_wins() {
        let file = CaptureFile::parse(
            r#"{
                "endpoints": [
                    {"id": "cam1", "address": "127.0.0.1:5001"},
                    {"id": "cam2", "address": "127.0.0.1:5002", "rotate_180": true}
                ],
                "resolution": "640x480",
                "timeouts": {"metadata_ms": 2500, "overall_ms": 8000}
            }"#,
        )
        .expect("config should parse");

        let overrides = Overrides {
            metadata_timeout: Some(Duration::from_secs(1)),
            reconstruct: true,
            ..Overrides::default()
        };
        let (endpoints, config) = file.resolve(overrides).expect("config should resolve");

        assert_eq!(endpoints.len(), 2);
        assert!(endpoints[1].rotate_180());
        assert_eq!(config.resolution, Resolution { width: 640, height: 480 });
        assert_eq!(config.format, "raw");
        assert_eq!(config.session.metadata_timeout, Duration::from_secs(1));
        assert_eq!(config.overall_timeout, Some(Duration::from_millis(8000)));
        assert!(config.reconstruct);
    }

    #[test]
    fn command_line_endpoints_replace_file_endpoints() {
        let file = CaptureFile::parse(r#"{"endpoints": [{"id": "a", "address": "h:1"}]}"#)
            .expect("config should parse");
        let overrides = Overrides {
            endpoints: vec![parse_endpoint_arg("b=h:2").expect("endpoint should parse")],
            ..Overrides::default()
        };
        let (endpoints, _) = file.resolve(overrides).expect("config should resolve");
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].id(), "b");
    }

    #[test]
    fn no_endpoints_is_usage_error() {
        let err = CaptureFile::default()
            .resolve(Overrides::default())
            .unwrap_err();
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        assert!(CaptureFile::parse(r#"{"endpoint": []}"#).is_err());
    }
}
