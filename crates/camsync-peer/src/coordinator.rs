use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use camsync_raw::{reconstruct, ReconstructParams};
use futures_util::FutureExt;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::endpoint::Endpoint;
use crate::error::{CaptureError, CoordinatorError};
use crate::metadata::{Resolution, DEFAULT_FORMAT, DEFAULT_RESOLUTION};
use crate::result::{capture_timestamp, CaptureResult, CaptureSet, CapturedFrame, EndpointResult};
use crate::session::{PeerSession, SessionConfig, Transfer};

/// Configuration for a [`CaptureCoordinator`].
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub session: SessionConfig,
    pub resolution: Resolution,
    pub format: String,
    /// Bound on a whole [`CaptureCoordinator::capture_all`] call.
    pub overall_timeout: Option<Duration>,
    /// Reconstruct raw transfers into images.
    pub reconstruct: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            resolution: DEFAULT_RESOLUTION,
            format: DEFAULT_FORMAT.to_string(),
            overall_timeout: None,
            reconstruct: true,
        }
    }
}

/// Captures from every configured endpoint at once.
pub struct CaptureCoordinator {
    sessions: Vec<Arc<Mutex<PeerSession>>>,
    endpoints: Vec<Arc<Endpoint>>,
    config: CoordinatorConfig,
}

impl CaptureCoordinator {
    pub fn new(endpoints: Vec<Endpoint>, config: CoordinatorConfig) -> Result<Self, CoordinatorError> {
        if endpoints.is_empty() {
            return Err(CoordinatorError::NoEndpoints);
        }
        let mut seen = HashSet::new();
        for ep in &endpoints {
            if !seen.insert(ep.id().to_string()) {
                return Err(CoordinatorError::DuplicateEndpoint(ep.id().to_string()));
            }
        }

        let endpoints: Vec<Arc<Endpoint>> = endpoints.into_iter().map(Arc::new).collect();
        let sessions = endpoints
            .iter()
            .map(|ep| {
                Arc::new(Mutex::new(PeerSession::new(
                    Arc::clone(ep),
                    config.session.clone(),
                )))
            })
            .collect();

        Ok(Self {
            sessions,
            endpoints,
            config,
        })
    }

    /// Endpoints in configuration order.
    pub fn endpoints(&self) -> &[Arc<Endpoint>] {
        &self.endpoints
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Capture once from every endpoint, bounded by `overall_timeout` if set.
    pub async fn capture_all(&self) -> CaptureSet {
        self.capture_all_with_cancel(CancellationToken::new()).await
    }

    /// Like [`capture_all`](Self::capture_all), also stopping when `cancel`
    /// fires. Endpoints still in flight at that point are recorded as
    /// [`CaptureError::Cancelled`].
    pub async fn capture_all_with_cancel(&self, cancel: CancellationToken) -> CaptureSet {
        let timestamp = capture_timestamp();
        let started = Instant::now();
        tracing::info!(
            timestamp = %timestamp,
            endpoints = self.endpoints.len(),
            resolution = %self.config.resolution,
            format = %self.config.format,
            "starting synchronized capture"
        );

        let mut slots: Vec<Option<CaptureResult>> = self.sessions.iter().map(|_| None).collect();
        let mut tasks = JoinSet::new();
        for (index, session) in self.sessions.iter().enumerate() {
            let session = Arc::clone(session);
            let resolution = self.config.resolution;
            let format = self.config.format.clone();
            let rebuild = self.config.reconstruct;
            tasks.spawn(async move {
                let result =
                    guard_panics(capture_endpoint(session, resolution, format, rebuild)).await;
                (index, result)
            });
        }

        let deadline = self.config.overall_timeout.map(|t| Instant::now() + t);
        let expired = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(expired);

        loop {
            tokio::select! {
                biased;
                joined = tasks.join_next() => match joined {
                    Some(joined) => record(&mut slots, joined),
                    None => break,
                },
                _ = cancel.cancelled() => {
                    drain_ready(&mut tasks, &mut slots);
                    tracing::warn!(pending = tasks.len(), "capture cancelled");
                    break;
                }
                _ = &mut expired => {
                    drain_ready(&mut tasks, &mut slots);
                    tracing::warn!(pending = tasks.len(), "overall capture timeout");
                    break;
                }
            }
        }
        // Abandoned sessions reconnect on their next cycle.
        tasks.shutdown().await;

        let results: Vec<EndpointResult> = self
            .endpoints
            .iter()
            .zip(slots)
            .map(|(ep, slot)| EndpointResult {
                endpoint_id: ep.id().to_string(),
                address: ep.address().to_string(),
                result: slot.unwrap_or(CaptureResult::Failed(CaptureError::Cancelled)),
            })
            .collect();

        let set = CaptureSet { timestamp, results };
        for (endpoint, err) in set.failures() {
            tracing::warn!(endpoint, error = %err, kind = err.kind(), "endpoint excluded from capture set");
        }
        tracing::info!(
            timestamp = %set.timestamp,
            captured = set.captured_count(),
            endpoints = set.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "capture finished"
        );
        set
    }
}

type Joined = Result<(usize, CaptureResult), tokio::task::JoinError>;

fn record(slots: &mut [Option<CaptureResult>], joined: Joined) {
    match joined {
        Ok((index, result)) => slots[index] = Some(result),
        Err(e) => tracing::error!(error = %e, "capture task failed to join"),
    }
}

/// Collect tasks that already finished, so only unfinished ones count as cancelled.
fn drain_ready(tasks: &mut JoinSet<(usize, CaptureResult)>, slots: &mut [Option<CaptureResult>]) {
    while let Some(joined) = tasks.try_join_next() {
        record(slots, joined);
    }
}

async fn guard_panics<F>(fut: F) -> CaptureResult
where
    F: Future<Output = CaptureResult>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "capture task panicked".to_string());
            CaptureResult::Failed(CaptureError::Internal(message))
        }
    }
}

async fn capture_endpoint(
    session: Arc<Mutex<PeerSession>>,
    resolution: Resolution,
    format: String,
    rebuild: bool,
) -> CaptureResult {
    let mut session = session.lock().await;
    let endpoint = Arc::clone(session.endpoint());
    let transfer = match session.capture(resolution, &format).await {
        Ok(transfer) => transfer,
        Err(e) => return CaptureResult::Failed(e),
    };
    drop(session);

    match finish(&endpoint, transfer, rebuild).await {
        Ok(frame) => CaptureResult::Captured(frame),
        Err(e) => {
            tracing::warn!(endpoint = %endpoint.id(), error = %e, "reconstruction failed");
            CaptureResult::Failed(e)
        }
    }
}

async fn finish(
    endpoint: &Endpoint,
    transfer: Transfer,
    rebuild: bool,
) -> Result<CapturedFrame, CaptureError> {
    let Transfer {
        metadata,
        layout,
        data,
        elapsed,
    } = transfer;

    let started = Instant::now();
    let image = if rebuild && layout.format.is_raw() {
        let params = ReconstructParams {
            sensor_width: metadata.sensor_width as usize,
            sensor_height: metadata.sensor_height as usize,
            width: metadata.width as usize,
            height: metadata.height as usize,
            pattern: layout.pattern,
            rotate_180: endpoint.rotate_180(),
        };
        let buf = data.clone();
        let image = tokio::task::spawn_blocking(move || reconstruct(&buf, &params))
            .await
            .map_err(|e| CaptureError::Internal(e.to_string()))??;
        Some(image)
    } else {
        None
    };
    let processing_time = match &image {
        Some(_) => {
            let t = started.elapsed();
            tracing::debug!(
                endpoint = %endpoint.id(),
                elapsed_ms = t.as_millis() as u64,
                "reconstruction complete"
            );
            t
        }
        None => Duration::ZERO,
    };

    Ok(CapturedFrame {
        endpoint_id: endpoint.id().to_string(),
        metadata,
        format: layout.format,
        data,
        image,
        transfer_time: elapsed,
        processing_time,
    })
}
