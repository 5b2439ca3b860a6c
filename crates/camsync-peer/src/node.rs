//! Endpoint side of the protocol.
//!
//! A [`NodeServer`] accepts client connections and answers each
//! capture-request by invoking its [`CaptureSource`] on the blocking pool,
//! then streaming metadata, chunks and completion back. A failed capture is
//! reported as a single capture-error.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use camsync_frame::FrameConfig;
use camsync_raw::{isolate_plane, pack10, packed_len, CfaColor, FilterPattern, FormatTag, SampleGrid};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::connector::{self, PeerStream};
use crate::error::{CaptureError, SourceError};
use crate::message::Message;
use crate::metadata::{CaptureFailure, CaptureRequest, Completion, FrameMetadata};
use crate::result::capture_timestamp;

/// Default chunk size: 64 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Node behaviour.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub node_id: String,
    pub chunk_size: usize,
    /// If set, every capture is also written here as
    /// `capture_{timestamp}_{node_id}.{ext}`.
    pub capture_dir: Option<PathBuf>,
    pub frame: FrameConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: format!("camera_node_{}", std::process::id()),
            chunk_size: DEFAULT_CHUNK_SIZE,
            capture_dir: None,
            frame: FrameConfig::default(),
        }
    }
}

/// What a capture source produced for one request.
#[derive(Debug, Clone)]
pub struct SourceCapture {
    pub data: Bytes,
    /// Resolution the client asked for.
    pub width: u32,
    pub height: u32,
    /// Geometry of `data`.
    pub sensor_width: u32,
    pub sensor_height: u32,
    pub filter_pattern: FilterPattern,
    pub format: FormatTag,
}

/// Produces one capture per request. Runs on the blocking pool.
pub trait CaptureSource: Send + Sync + 'static {
    fn capture(&self, request: &CaptureRequest) -> Result<SourceCapture, SourceError>;
}

impl<F> CaptureSource for F
where
    F: Fn(&CaptureRequest) -> Result<SourceCapture, SourceError> + Send + Sync + 'static,
{
    fn capture(&self, request: &CaptureRequest) -> Result<SourceCapture, SourceError> {
        self(request)
    }
}

/// Serves an existing packed raw file with operator-declared geometry.
///
/// With [`isolate`](FileSource::isolate) set, one filter color's plane is
/// extracted and repacked, and the transfer is declared single-channel at
/// half resolution.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    sensor_width: u32,
    sensor_height: u32,
    pattern: FilterPattern,
    isolate: Option<CfaColor>,
}

impl FileSource {
    pub fn new(
        path: impl Into<PathBuf>,
        sensor_width: u32,
        sensor_height: u32,
        pattern: FilterPattern,
    ) -> Self {
        Self {
            path: path.into(),
            sensor_width,
            sensor_height,
            pattern,
            isolate: None,
        }
    }

    pub fn isolate(mut self, color: Option<CfaColor>) -> Self {
        self.isolate = color;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CaptureSource for FileSource {
    fn capture(&self, request: &CaptureRequest) -> Result<SourceCapture, SourceError> {
        let format: FormatTag = request.format.parse()?;
        if !format.is_raw() {
            return Err(SourceError::Capture(format!(
                "file source only serves raw, not {format}"
            )));
        }

        let data = std::fs::read(&self.path)?;
        let samples = (self.sensor_width as usize) * (self.sensor_height as usize);
        let expected = packed_len(samples).unwrap_or(usize::MAX);
        if data.len() != expected {
            return Err(SourceError::Capture(format!(
                "{} holds {} bytes, expected {expected} for {}x{}",
                self.path.display(),
                data.len(),
                self.sensor_width,
                self.sensor_height
            )));
        }

        let (width, height) = (request.resolution.width, request.resolution.height);
        match (self.isolate, self.pattern) {
            (Some(color), FilterPattern::Bayer(cfa)) => {
                let grid = SampleGrid::from_packed(
                    &data,
                    self.sensor_width as usize,
                    self.sensor_height as usize,
                )?;
                let plane = isolate_plane(&grid, cfa, color);
                tracing::debug!(
                    ?color,
                    pattern = %cfa,
                    width = plane.width(),
                    height = plane.height(),
                    "isolated filter plane"
                );
                Ok(SourceCapture {
                    data: Bytes::from(pack10(plane.samples())),
                    width: (width / 2).max(1),
                    height: (height / 2).max(1),
                    sensor_width: plane.width() as u32,
                    sensor_height: plane.height() as u32,
                    filter_pattern: FilterPattern::Mono,
                    format,
                })
            }
            (Some(_), FilterPattern::Mono) => Err(SourceError::Capture(
                "cannot isolate a filter plane from single-channel data".into(),
            )),
            (None, pattern) => Ok(SourceCapture {
                data: Bytes::from(data),
                width,
                height,
                sensor_width: self.sensor_width,
                sensor_height: self.sensor_height,
                filter_pattern: pattern,
                format,
            }),
        }
    }
}

/// Accepts client connections and serves captures.
pub struct NodeServer<S> {
    listener: TcpListener,
    source: Arc<S>,
    config: Arc<NodeConfig>,
}

impl<S: CaptureSource> NodeServer<S> {
    pub async fn bind(address: &str, source: S, config: NodeConfig) -> std::io::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        tracing::info!(
            address = %listener.local_addr()?,
            node_id = %config.node_id,
            "endpoint node listening"
        );
        Ok(Self {
            listener,
            source: Arc::new(source),
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve until the process exits.
    pub async fn serve(self) -> std::io::Result<()> {
        self.serve_until(CancellationToken::new()).await
    }

    /// Serve until `shutdown` fires. Connections already open are dropped.
    pub async fn serve_until(self, shutdown: CancellationToken) -> std::io::Result<()> {
        let mut connections = tokio::task::JoinSet::new();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (stream, peer) = accepted?;
                    tracing::debug!(%peer, "accepted connection");
                    let source = Arc::clone(&self.source);
                    let config = Arc::clone(&self.config);
                    connections.spawn(async move {
                        if let Err(e) = serve_connection(stream, source, config).await {
                            tracing::warn!(%peer, error = %e, "connection ended with error");
                        }
                    });
                }
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                _ = shutdown.cancelled() => {
                    tracing::info!("endpoint node shutting down");
                    break;
                }
            }
        }
        connections.shutdown().await;
        Ok(())
    }
}

async fn serve_connection<S: CaptureSource>(
    stream: TcpStream,
    source: Arc<S>,
    config: Arc<NodeConfig>,
) -> Result<(), CaptureError> {
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(error = %e, "failed to set TCP_NODELAY");
    }
    let mut framed = connector::wrap(stream, config.frame.clone());

    while let Some(frame) = framed.next().await {
        match Message::from_frame(frame?)? {
            Message::CaptureRequest(request) => {
                serve_request(&mut framed, Arc::clone(&source), Arc::clone(&config), request)
                    .await?;
            }
            other => {
                return Err(CaptureError::Protocol(format!(
                    "client sent {} event",
                    camsync_frame::event_name(other.kind())
                )));
            }
        }
    }
    tracing::debug!("client disconnected");
    Ok(())
}

async fn serve_request<S: CaptureSource>(
    framed: &mut PeerStream,
    source: Arc<S>,
    config: Arc<NodeConfig>,
    request: CaptureRequest,
) -> Result<(), CaptureError> {
    let request_id = request.request_id;
    tracing::info!(
        request_id,
        resolution = %request.resolution,
        format = %request.format,
        "capture requested"
    );

    let started = std::time::Instant::now();
    let job_config = Arc::clone(&config);
    let outcome = tokio::task::spawn_blocking(move || produce(&*source, &job_config, &request))
        .await
        .map_err(|e| CaptureError::Internal(e.to_string()))?;

    let (metadata, data) = match outcome {
        Ok(produced) => produced,
        Err(e) => {
            tracing::warn!(request_id, error = %e, "capture failed");
            let failure = Message::CaptureError(CaptureFailure {
                request_id: Some(request_id),
                reason: e.to_string(),
            });
            framed.send(failure.to_frame()?).await?;
            return Ok(());
        }
    };

    framed.feed(Message::Metadata(metadata.clone()).to_frame()?).await?;
    let chunk_size = config.chunk_size.max(1);
    let mut offset = 0;
    while offset < data.len() {
        let end = (offset + chunk_size).min(data.len());
        framed.feed(Message::Chunk(data.slice(offset..end)).to_frame()?).await?;
        offset = end;
    }
    let complete = Message::Complete(Completion {
        request_id: Some(request_id),
    });
    framed.send(complete.to_frame()?).await?;

    tracing::info!(
        request_id,
        filename = %metadata.filename,
        bytes = data.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "capture sent"
    );
    Ok(())
}

/// Run the source and describe its output. Blocking.
fn produce<S: CaptureSource + ?Sized>(
    source: &S,
    config: &NodeConfig,
    request: &CaptureRequest,
) -> Result<(FrameMetadata, Bytes), SourceError> {
    let captured = source.capture(request)?;
    let timestamp = capture_timestamp();
    let filename = format!(
        "capture_{timestamp}_{}.{}",
        config.node_id,
        captured.format.extension()
    );

    if let Some(dir) = &config.capture_dir {
        store(dir, &filename, &captured.data)?;
    }

    let metadata = FrameMetadata {
        request_id: Some(request.request_id),
        filename,
        timestamp,
        node_id: config.node_id.clone(),
        size: captured.data.len() as u64,
        chunk_size: config.chunk_size.max(1) as u64,
        width: captured.width,
        height: captured.height,
        sensor_width: captured.sensor_width,
        sensor_height: captured.sensor_height,
        filter_pattern: captured.filter_pattern.as_str().to_string(),
        format: captured.format.as_str().to_string(),
    };
    Ok((metadata, captured.data))
}

fn store(dir: &Path, filename: &str, data: &[u8]) -> Result<(), SourceError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(filename);
    std::fs::write(&path, data).map_err(|e| match e.kind() {
        std::io::ErrorKind::StorageFull => {
            SourceError::InsufficientStorage(format!("{}: {e}", path.display()))
        }
        _ => SourceError::Io(e),
    })?;
    tracing::debug!(path = %path.display(), bytes = data.len(), "capture stored");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use camsync_raw::{unpack10, CfaPattern};

    use super::*;
    use crate::endpoint::Endpoint;
    use crate::metadata::Resolution;
    use crate::session::{PeerSession, SessionConfig};

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "camsync-node-{}-{}-{}",
            tag,
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("time should be after epoch")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
        dir
    }

    fn tile_samples() -> Vec<u16> {
        let base = [[100u16, 200], [300, 401]];
        (0..16).map(|i| base[(i / 4) % 2][(i % 4) % 2]).collect()
    }

    async fn start<S: CaptureSource>(source: S, config: NodeConfig) -> (String, CancellationToken) {
        let server = NodeServer::bind("127.0.0.1:0", source, config)
            .await
            .expect("node should bind");
        let addr = server.local_addr().expect("local addr").to_string();
        let shutdown = CancellationToken::new();
        tokio::spawn(server.serve_until(shutdown.clone()));
        (addr, shutdown)
    }

    fn session(addr: String) -> PeerSession {
        PeerSession::new(
            Arc::new(Endpoint::new("node", addr)),
            SessionConfig {
                metadata_timeout: Duration::from_secs(2),
                ..SessionConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn serves_file_in_chunks() {
        let dir = temp_dir("file");
        let path = dir.join("frame.raw");
        let packed = pack10(&tile_samples());
        std::fs::write(&path, &packed).expect("write raw file");

        let source = FileSource::new(&path, 4, 4, FilterPattern::Bayer(CfaPattern::Rggb));
        let config = NodeConfig {
            node_id: "7".into(),
            chunk_size: 3,
            capture_dir: Some(dir.join("captures")),
            ..NodeConfig::default()
        };
        let (addr, shutdown) = start(source, config).await;

        let transfer = session(addr)
            .capture(Resolution::new(4, 4), "raw")
            .await
            .expect("capture should succeed");
        assert_eq!(transfer.data.as_ref(), packed.as_slice());
        assert_eq!(transfer.metadata.node_id, "7");
        assert_eq!(transfer.metadata.chunk_size, 3);
        assert!(transfer.metadata.filename.starts_with("capture_"));
        assert!(transfer.metadata.filename.ends_with("_7.raw"));

        let stored = dir.join("captures").join(&transfer.metadata.filename);
        assert_eq!(std::fs::read(stored).expect("stored capture"), packed);

        shutdown.cancel();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn isolated_plane_is_single_channel_half_resolution() {
        let dir = temp_dir("isolate");
        let path = dir.join("frame.raw");
        std::fs::write(&path, pack10(&tile_samples())).expect("write raw file");

        let source = FileSource::new(&path, 4, 4, FilterPattern::Bayer(CfaPattern::Bggr))
            .isolate(Some(CfaColor::Red));
        let (addr, shutdown) = start(source, NodeConfig::default()).await;

        let transfer = session(addr)
            .capture(Resolution::new(4, 4), "raw")
            .await
            .expect("capture should succeed");
        assert_eq!(transfer.layout.pattern, FilterPattern::Mono);
        assert_eq!(
            (transfer.metadata.sensor_width, transfer.metadata.sensor_height),
            (2, 2)
        );
        // BGGR keeps red at the bottom-right cell of each tile.
        assert_eq!(unpack10(&transfer.data, 4).expect("unpack"), vec![401; 4]);

        shutdown.cancel();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn source_failure_becomes_capture_error() {
        let source = |_: &CaptureRequest| -> Result<SourceCapture, SourceError> {
            Err(SourceError::InsufficientStorage("disk full".into()))
        };
        let (addr, shutdown) = start(source, NodeConfig::default()).await;

        let mut s = session(addr);
        let err = s.capture(Resolution::new(4, 4), "raw").await.unwrap_err();
        assert!(matches!(&err, CaptureError::Transfer(reason) if reason.contains("disk full")));
        assert!(s.is_connected());

        shutdown.cancel();
    }

    #[test]
    fn wrong_file_size_is_reported() {
        let dir = temp_dir("short");
        let path = dir.join("frame.raw");
        std::fs::write(&path, vec![0u8; 19]).expect("write raw file");

        let source = FileSource::new(&path, 4, 4, FilterPattern::Mono);
        let err = source
            .capture(&CaptureRequest::default())
            .expect_err("19 bytes is not 4x4 packed");
        assert!(matches!(err, SourceError::Capture(msg) if msg.contains("expected 20")));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn requests_on_one_connection_are_served_in_order() {
        let counter = std::sync::atomic::AtomicU32::new(0);
        let source = move |req: &CaptureRequest| -> Result<SourceCapture, SourceError> {
            let n = counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) as u8;
            Ok(SourceCapture {
                data: Bytes::from(vec![n; 5]),
                width: req.resolution.width,
                height: req.resolution.height,
                sensor_width: 4,
                sensor_height: 1,
                filter_pattern: FilterPattern::Mono,
                format: FormatTag::Raw,
            })
        };
        let (addr, shutdown) = start(source, NodeConfig::default()).await;

        let mut s = session(addr);
        for expected in 0u8..3 {
            let transfer = s
                .capture(Resolution::new(4, 1), "raw")
                .await
                .expect("capture should succeed");
            assert_eq!(transfer.data.as_ref(), &[expected; 5]);
        }

        shutdown.cancel();
    }

    #[tokio::test]
    async fn random_sizes_and_chunkings_reassemble_exactly() {
        use rand::Rng;

        let mut rng = rand::thread_rng();
        for _ in 0..8 {
            let width: u32 = rng.gen_range(1..40);
            let height: u32 = rng.gen_range(1..20);
            let samples: Vec<u16> = (0..width * height).map(|_| rng.gen_range(0..1024)).collect();
            let packed = Bytes::from(pack10(&samples));
            let chunk_size = rng.gen_range(1..64);

            let data = packed.clone();
            let source = move |req: &CaptureRequest| -> Result<SourceCapture, SourceError> {
                Ok(SourceCapture {
                    data: data.clone(),
                    width: req.resolution.width,
                    height: req.resolution.height,
                    sensor_width: width,
                    sensor_height: height,
                    filter_pattern: FilterPattern::Mono,
                    format: FormatTag::Raw,
                })
            };
            let config = NodeConfig {
                chunk_size,
                ..NodeConfig::default()
            };
            let (addr, shutdown) = start(source, config).await;

            let transfer = session(addr)
                .capture(Resolution::new(width, height), "raw")
                .await
                .expect("capture should succeed");
            assert_eq!(transfer.data, packed, "{width}x{height} chunk {chunk_size}");
            assert_eq!(
                unpack10(&transfer.data, samples.len()).expect("unpack"),
                samples
            );

            shutdown.cancel();
        }
    }
}
