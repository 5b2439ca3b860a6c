//! One endpoint's capture cycle.
//!
//! ```text
//! Idle -> Requested -> AwaitingMetadata -> ReceivingChunks -> AwaitingCompletion -> Succeeded
//!                          \___________________\_____________________\_______________-> Failed
//! ```
//!
//! Each wait is bounded on its own: the metadata wait and the completion wait
//! by a single deadline, the chunk phase by a deadline that restarts with
//! every chunk.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use camsync_frame::{event_name, Frame};
use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio::time::Instant;

use crate::connector::{self, PeerStream};
use crate::endpoint::Endpoint;
use crate::error::{CaptureError, Result};
use crate::message::Message;
use crate::metadata::{CaptureRequest, FrameMetadata, Resolution, TransferLayout};

/// Default per-phase wait.
pub const DEFAULT_PHASE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default upper bound on a declared transfer: 256 MiB.
pub const DEFAULT_MAX_TRANSFER: u64 = 256 * 1024 * 1024;

/// Timeouts and limits for a [`PeerSession`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub connect_timeout: Duration,
    /// Wait for metadata after the request is sent.
    pub metadata_timeout: Duration,
    /// Wait for each individual chunk.
    pub chunk_timeout: Duration,
    /// Wait for the completion signal once all bytes are in.
    pub completion_timeout: Duration,
    pub max_transfer_size: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            metadata_timeout: DEFAULT_PHASE_TIMEOUT,
            chunk_timeout: DEFAULT_PHASE_TIMEOUT,
            completion_timeout: DEFAULT_PHASE_TIMEOUT,
            max_transfer_size: DEFAULT_MAX_TRANSFER,
        }
    }
}

/// Where a session is in its current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Requested,
    AwaitingMetadata,
    ReceivingChunks,
    AwaitingCompletion,
    Succeeded,
    Failed,
}

impl SessionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Succeeded | SessionPhase::Failed)
    }

    /// True while a cycle is running.
    pub fn in_flight(self) -> bool {
        !self.is_terminal() && self != SessionPhase::Idle
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Requested => "requested",
            SessionPhase::AwaitingMetadata => "awaiting-metadata",
            SessionPhase::ReceivingChunks => "receiving-chunks",
            SessionPhase::AwaitingCompletion => "awaiting-completion",
            SessionPhase::Succeeded => "succeeded",
            SessionPhase::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A completed transfer.
#[derive(Debug, Clone)]
pub struct Transfer {
    pub metadata: FrameMetadata,
    pub layout: TransferLayout,
    /// Exactly `metadata.size` bytes.
    pub data: Bytes,
    /// Whole cycle, connection setup included.
    pub elapsed: Duration,
}

/// Drives one endpoint through capture cycles, reusing its connection.
#[derive(Debug)]
pub struct PeerSession {
    endpoint: Arc<Endpoint>,
    config: SessionConfig,
    stream: Option<PeerStream>,
    phase: SessionPhase,
    last_request_id: u64,
}

impl PeerSession {
    pub fn new(endpoint: Arc<Endpoint>, config: SessionConfig) -> Self {
        Self {
            endpoint,
            config,
            stream: None,
            phase: SessionPhase::Idle,
            last_request_id: 0,
        }
    }

    pub fn endpoint(&self) -> &Arc<Endpoint> {
        &self.endpoint
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Drop the connection; the next cycle reconnects.
    pub fn disconnect(&mut self) {
        self.stream = None;
    }

    /// Run one capture cycle.
    ///
    /// Buffered events from earlier cycles are discarded before the request
    /// goes out, and events echoing another request id are ignored. If a
    /// previous cycle was abandoned mid-flight the connection is replaced.
    pub async fn capture(&mut self, resolution: Resolution, format: &str) -> Result<Transfer> {
        if self.phase.in_flight() {
            tracing::debug!(
                endpoint = %self.endpoint.id(),
                phase = %self.phase,
                "previous cycle was interrupted; reconnecting"
            );
            self.stream = None;
        }
        self.phase = SessionPhase::Idle;
        self.last_request_id += 1;
        let request_id = self.last_request_id;
        let started = Instant::now();

        let mut result = self.run_cycle(request_id, resolution, format).await;
        let elapsed = started.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;

        match &mut result {
            Ok(transfer) => {
                transfer.elapsed = elapsed;
                self.phase = SessionPhase::Succeeded;
                tracing::info!(
                    endpoint = %self.endpoint.id(),
                    request_id,
                    bytes = transfer.data.len(),
                    elapsed_ms,
                    "capture transfer complete"
                );
            }
            Err(e) => {
                self.phase = SessionPhase::Failed;
                if !e.keeps_connection() {
                    self.stream = None;
                }
                tracing::warn!(
                    endpoint = %self.endpoint.id(),
                    request_id,
                    elapsed_ms,
                    error = %e,
                    "capture failed"
                );
            }
        }
        result
    }

    async fn run_cycle(
        &mut self,
        request_id: u64,
        resolution: Resolution,
        format: &str,
    ) -> Result<Transfer> {
        let reused = self.ensure_connected().await?;

        let request = Message::CaptureRequest(CaptureRequest {
            request_id,
            resolution,
            format: format.to_string(),
        })
        .to_frame()?;

        self.phase = SessionPhase::Requested;
        if let Err(e) = self.send(request.clone()).await {
            if !reused {
                return Err(e);
            }
            tracing::debug!(
                endpoint = %self.endpoint.id(),
                error = %e,
                "kept connection is gone; reconnecting"
            );
            self.stream = None;
            self.ensure_connected().await?;
            self.send(request).await?;
        }
        tracing::debug!(endpoint = %self.endpoint.id(), request_id, %resolution, format, "capture requested");

        let endpoint_id = self.endpoint.id().to_string();
        let config = self.config.clone();
        let stream = self.stream.as_mut().ok_or(CaptureError::Disconnected)?;

        // Phase 1: metadata.
        self.phase = SessionPhase::AwaitingMetadata;
        let deadline = Instant::now() + config.metadata_timeout;
        let (metadata, layout) = loop {
            let message = recv(stream, deadline, || {
                CaptureError::MetadataTimeout(config.metadata_timeout)
            })
            .await?;
            match message {
                Message::Metadata(m) if is_current(m.request_id, request_id) => {
                    let layout = m.validate(config.max_transfer_size)?;
                    break (m, layout);
                }
                Message::CaptureError(f) if is_current(f.request_id, request_id) => {
                    return Err(CaptureError::Transfer(f.reason));
                }
                Message::CaptureRequest(_) => {
                    return Err(CaptureError::Protocol("endpoint sent a capture-request".into()));
                }
                other => ignore(&endpoint_id, request_id, &other),
            }
        };
        if layout.format.is_raw() {
            if let Some(info) = metadata.sensor_info() {
                self.endpoint.remember_sensor(info);
            }
        }
        tracing::debug!(
            endpoint = %endpoint_id,
            request_id,
            bytes = metadata.size,
            chunk_size = metadata.chunk_size,
            filename = %metadata.filename,
            "metadata received"
        );

        // Phase 2: chunks.
        self.phase = SessionPhase::ReceivingChunks;
        let expected = metadata.size;
        let mut buf = BytesMut::with_capacity(expected as usize);
        while (buf.len() as u64) < expected {
            let received = buf.len() as u64;
            let deadline = Instant::now() + config.chunk_timeout;
            let message = recv(stream, deadline, || CaptureError::ChunkTimeout {
                after: config.chunk_timeout,
                received,
                expected,
            })
            .await?;
            match message {
                Message::Chunk(bytes) => {
                    let remaining = (expected - received) as usize;
                    if bytes.len() > remaining {
                        tracing::debug!(
                            endpoint = %endpoint_id,
                            request_id,
                            dropped = bytes.len() - remaining,
                            "truncating chunk past declared size"
                        );
                        buf.extend_from_slice(&bytes[..remaining]);
                    } else {
                        buf.extend_from_slice(&bytes);
                    }
                }
                Message::Complete(c) if is_current(c.request_id, request_id) => {
                    return Err(CaptureError::SizeMismatch {
                        expected,
                        actual: received,
                    });
                }
                Message::CaptureError(f) if is_current(f.request_id, request_id) => {
                    return Err(CaptureError::Transfer(f.reason));
                }
                Message::Metadata(m) if is_current(m.request_id, request_id) => {
                    return Err(CaptureError::Protocol(
                        "metadata repeated during transfer".into(),
                    ));
                }
                Message::CaptureRequest(_) => {
                    return Err(CaptureError::Protocol("endpoint sent a capture-request".into()));
                }
                other => ignore(&endpoint_id, request_id, &other),
            }
        }

        // Phase 3: completion.
        self.phase = SessionPhase::AwaitingCompletion;
        let deadline = Instant::now() + config.completion_timeout;
        loop {
            let message = recv(stream, deadline, || {
                CaptureError::CompletionTimeout(config.completion_timeout)
            })
            .await?;
            match message {
                Message::Complete(c) if is_current(c.request_id, request_id) => break,
                Message::CaptureError(f) if is_current(f.request_id, request_id) => {
                    return Err(CaptureError::Transfer(f.reason));
                }
                Message::Chunk(bytes) => {
                    tracing::debug!(
                        endpoint = %endpoint_id,
                        request_id,
                        dropped = bytes.len(),
                        "ignoring chunk after declared size"
                    );
                }
                Message::CaptureRequest(_) => {
                    return Err(CaptureError::Protocol("endpoint sent a capture-request".into()));
                }
                other => ignore(&endpoint_id, request_id, &other),
            }
        }

        Ok(Transfer {
            metadata,
            layout,
            data: buf.freeze(),
            elapsed: Duration::ZERO,
        })
    }

    /// Returns whether an existing connection was kept.
    async fn ensure_connected(&mut self) -> Result<bool> {
        if let Some(stream) = self.stream.as_mut() {
            if drain_buffered(stream, self.endpoint.id()) {
                return Ok(true);
            }
            tracing::debug!(endpoint = %self.endpoint.id(), "connection closed since last cycle");
            self.stream = None;
        }
        let stream = connector::connect(self.endpoint.address(), self.config.connect_timeout).await?;
        self.stream = Some(stream);
        Ok(false)
    }

    async fn send(&mut self, frame: Frame) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(CaptureError::Disconnected)?;
        stream.send(frame).await?;
        Ok(())
    }
}

/// Events without a request id belong to whichever cycle is running.
fn is_current(echoed: Option<u64>, request_id: u64) -> bool {
    echoed.is_none_or(|id| id == request_id)
}

fn ignore(endpoint: &str, request_id: u64, message: &Message) {
    tracing::debug!(
        endpoint,
        request_id,
        echoed = ?message.request_id(),
        kind = event_name(message.kind()),
        "ignoring stale event"
    );
}

async fn recv(
    stream: &mut PeerStream,
    deadline: Instant,
    on_timeout: impl FnOnce() -> CaptureError,
) -> Result<Message> {
    match tokio::time::timeout_at(deadline, stream.next()).await {
        Err(_) => Err(on_timeout()),
        Ok(None) => Err(CaptureError::Disconnected),
        Ok(Some(Err(e))) => Err(e.into()),
        Ok(Some(Ok(frame))) => Message::from_frame(frame),
    }
}

/// Discard frames that are already readable without waiting.
///
/// Returns false if the connection turned out to be closed or broken.
fn drain_buffered(stream: &mut PeerStream, endpoint: &str) -> bool {
    let mut discarded = 0usize;
    let alive = loop {
        match stream.next().now_or_never() {
            None => break true,
            Some(Some(Ok(_))) => discarded += 1,
            Some(Some(Err(_))) | Some(None) => break false,
        }
    };
    if discarded > 0 {
        tracing::debug!(endpoint, discarded, "discarded buffered events from an earlier cycle");
    }
    alive
}

#[cfg(test)]
mod tests {
    use camsync_raw::pack10;

    use super::*;
    use crate::metadata::tests::raw_metadata;
    use crate::testutil::{raw_transfer, scripted_endpoint, Step};

    fn quick() -> SessionConfig {
        SessionConfig {
            connect_timeout: Duration::from_secs(2),
            metadata_timeout: Duration::from_millis(300),
            chunk_timeout: Duration::from_millis(300),
            completion_timeout: Duration::from_millis(300),
            ..SessionConfig::default()
        }
    }

    fn session(addr: String) -> PeerSession {
        PeerSession::new(Arc::new(Endpoint::new("cam", addr)), quick())
    }

    fn body() -> Vec<u8> {
        pack10(&(0..16).map(|i| i * 50).collect::<Vec<u16>>())
    }

    #[tokio::test]
    async fn successful_cycle_returns_exact_bytes() {
        let data = body();
        let expected = data.clone();
        let addr = scripted_endpoint(move |req, _| raw_transfer(req.request_id, 4, 4, &data, 7)).await;

        let mut s = session(addr);
        let transfer = s
            .capture(Resolution::new(4, 4), "raw")
            .await
            .expect("capture should succeed");
        assert_eq!(transfer.data.as_ref(), expected.as_slice());
        assert_eq!(transfer.metadata.size, 20);
        assert_eq!(s.phase(), SessionPhase::Succeeded);
        assert!(s.is_connected());
        assert_eq!(
            s.endpoint().sensor_info().map(|i| (i.sensor_width, i.sensor_height)),
            Some((4, 4))
        );
    }

    #[tokio::test]
    async fn metadata_timeout_drops_connection() {
        let addr = scripted_endpoint(|_, _| vec![Step::Sleep(Duration::from_secs(5))]).await;

        let mut s = session(addr);
        let started = std::time::Instant::now();
        let err = s.capture(Resolution::new(4, 4), "raw").await.unwrap_err();
        assert!(matches!(err, CaptureError::MetadataTimeout(_)), "{err}");
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(s.phase(), SessionPhase::Failed);
        assert!(!s.is_connected());
    }

    #[tokio::test]
    async fn stalled_transfer_is_chunk_timeout() {
        let data = body();
        let addr = scripted_endpoint(move |req, _| {
            let mut meta = raw_metadata(4, 4);
            meta.request_id = Some(req.request_id);
            vec![
                Step::Send(Message::Metadata(meta)),
                Step::Send(Message::Chunk(Bytes::copy_from_slice(&data[..8]))),
                Step::Sleep(Duration::from_secs(5)),
            ]
        })
        .await;

        let err = session(addr)
            .capture(Resolution::new(4, 4), "raw")
            .await
            .unwrap_err();
        assert!(
            matches!(
                err,
                CaptureError::ChunkTimeout {
                    received: 8,
                    expected: 20,
                    ..
                }
            ),
            "{err}"
        );
    }

    #[tokio::test]
    async fn reserved_event_kind_is_protocol_error() {
        let addr = scripted_endpoint(|_, _| {
            // "CS", 4-byte payload, kind 9; the payload itself never follows.
            vec![
                Step::Raw(vec![0x43, 0x53, 4, 0, 0, 0, 9, 0]),
                Step::Sleep(Duration::from_secs(5)),
            ]
        })
        .await;

        let mut s = session(addr);
        let err = s.capture(Resolution::new(4, 4), "raw").await.unwrap_err();
        assert!(matches!(&err, CaptureError::Protocol(msg) if msg.contains("reserved")), "{err}");
        assert!(!s.is_connected());
    }

    #[tokio::test]
    async fn missing_completion_is_completion_timeout() {
        let data = body();
        let addr = scripted_endpoint(move |req, _| {
            let mut steps = raw_transfer(req.request_id, 4, 4, &data, 20);
            steps.pop(); // no complete
            steps
        })
        .await;

        let err = session(addr)
            .capture(Resolution::new(4, 4), "raw")
            .await
            .unwrap_err();
        assert!(matches!(err, CaptureError::CompletionTimeout(_)), "{err}");
    }

    #[tokio::test]
    async fn extra_trailing_chunk_does_not_grow_buffer() {
        let data = body();
        let addr = scripted_endpoint(move |req, _| {
            let mut steps = raw_transfer(req.request_id, 4, 4, &data, 20);
            let complete = steps.pop().expect("complete step");
            // Oversized final chunk would already be truncated; add a whole extra one.
            steps.push(Step::Send(Message::Chunk(Bytes::from_static(&[0xEE; 9]))));
            steps.push(complete);
            steps
        })
        .await;

        let transfer = session(addr)
            .capture(Resolution::new(4, 4), "raw")
            .await
            .expect("capture should succeed");
        assert_eq!(transfer.data.len(), 20);
        assert!(!transfer.data.contains(&0xEE));
    }

    #[tokio::test]
    async fn oversized_final_chunk_is_truncated() {
        let mut data = body();
        data.extend_from_slice(&[0xEE; 6]);
        let addr = scripted_endpoint(move |req, _| {
            let mut meta = raw_metadata(4, 4);
            meta.request_id = Some(req.request_id);
            vec![
                Step::Send(Message::Metadata(meta)),
                Step::Send(Message::Chunk(Bytes::copy_from_slice(&data[..16]))),
                Step::Send(Message::Chunk(Bytes::copy_from_slice(&data[16..]))),
                Step::Send(Message::Complete(Default::default())),
            ]
        })
        .await;

        let transfer = session(addr)
            .capture(Resolution::new(4, 4), "raw")
            .await
            .expect("capture should succeed");
        assert_eq!(transfer.data.as_ref(), &body()[..]);
    }

    #[tokio::test]
    async fn capture_error_short_circuits_and_keeps_connection() {
        let addr = scripted_endpoint(|req, _| {
            vec![Step::Send(Message::CaptureError(
                crate::metadata::CaptureFailure {
                    request_id: Some(req.request_id),
                    reason: "camera busy".into(),
                },
            ))]
        })
        .await;

        let mut s = session(addr);
        let err = s.capture(Resolution::new(4, 4), "raw").await.unwrap_err();
        assert!(matches!(&err, CaptureError::Transfer(r) if r == "camera busy"));
        assert!(s.is_connected());
    }

    #[tokio::test]
    async fn early_complete_is_size_mismatch() {
        let addr = scripted_endpoint(|req, _| {
            let mut meta = raw_metadata(4, 4);
            meta.request_id = Some(req.request_id);
            vec![
                Step::Send(Message::Metadata(meta)),
                Step::Send(Message::Chunk(Bytes::from_static(&[1, 2, 3]))),
                Step::Send(Message::Complete(Default::default())),
            ]
        })
        .await;

        let err = session(addr)
            .capture(Resolution::new(4, 4), "raw")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CaptureError::SizeMismatch {
                expected: 20,
                actual: 3
            }
        ));
    }

    #[tokio::test]
    async fn late_completion_does_not_leak_into_next_cycle() {
        // Cycle 1: all bytes, then the completion arrives after the timeout.
        // Cycle 2: a normal transfer with different content.
        let first = vec![0x11u8; 20];
        let second = vec![0x22u8; 20];
        let addr = scripted_endpoint(move |req, n| {
            if n == 0 {
                let mut steps = raw_transfer(req.request_id, 4, 4, &first, 8);
                let complete = steps.pop().expect("complete step");
                steps.push(Step::Sleep(Duration::from_millis(600)));
                steps.push(Step::Send(Message::Chunk(Bytes::from_static(&[0x11; 20]))));
                steps.push(complete);
                steps
            } else {
                raw_transfer(req.request_id, 4, 4, &second, 8)
            }
        })
        .await;

        let mut s = session(addr);
        let err = s.capture(Resolution::new(4, 4), "raw").await.unwrap_err();
        assert!(matches!(err, CaptureError::CompletionTimeout(_)), "{err}");

        tokio::time::sleep(Duration::from_millis(500)).await;

        let transfer = s
            .capture(Resolution::new(4, 4), "raw")
            .await
            .expect("second cycle should succeed");
        assert_eq!(transfer.data.as_ref(), &[0x22u8; 20][..]);
    }

    #[tokio::test]
    async fn stale_events_on_kept_connection_are_ignored() {
        // After a capture-error the endpoint (misbehaving) sends a stale complete
        // for the old request. The next cycle must drain or ignore it.
        let data = body();
        let addr = scripted_endpoint(move |req, n| {
            if n == 0 {
                vec![
                    Step::Send(Message::CaptureError(crate::metadata::CaptureFailure {
                        request_id: Some(req.request_id),
                        reason: "first fails".into(),
                    })),
                    Step::Send(Message::Complete(crate::metadata::Completion {
                        request_id: Some(req.request_id),
                    })),
                ]
            } else {
                raw_transfer(req.request_id, 4, 4, &data, 5)
            }
        })
        .await;

        let mut s = session(addr);
        assert!(s.capture(Resolution::new(4, 4), "raw").await.is_err());
        tokio::time::sleep(Duration::from_millis(50)).await;
        let transfer = s
            .capture(Resolution::new(4, 4), "raw")
            .await
            .expect("second cycle should succeed");
        assert_eq!(transfer.data.as_ref(), body().as_slice());
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_connection_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("listener should bind");
        let addr = listener.local_addr().expect("local addr").to_string();
        drop(listener);

        let mut s = session(addr);
        let err = s.capture(Resolution::new(4, 4), "raw").await.unwrap_err();
        assert!(matches!(err, CaptureError::Connection { .. }));
        assert_eq!(s.phase(), SessionPhase::Failed);
    }

    #[tokio::test]
    async fn reconnects_after_endpoint_closes_between_cycles() {
        let data = body();
        let addr = scripted_endpoint(move |req, _| {
            let mut steps = raw_transfer(req.request_id, 4, 4, &data, 20);
            steps.push(Step::Close);
            steps
        })
        .await;

        let mut s = session(addr);
        for _ in 0..2 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            let transfer = s
                .capture(Resolution::new(4, 4), "raw")
                .await
                .expect("capture should succeed");
            assert_eq!(transfer.data.len(), 20);
        }
    }
}
