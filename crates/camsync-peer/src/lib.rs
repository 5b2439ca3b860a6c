//! Synchronized capture across camera endpoints.
//!
//! A [`CaptureCoordinator`] runs one [`PeerSession`] cycle per configured
//! [`Endpoint`] concurrently and collects the outcomes into a
//! [`CaptureSet`]. One endpoint failing never aborts the others.
//!
//! The endpoint side of the protocol is [`NodeServer`], which serves
//! captures produced by a [`CaptureSource`].

pub mod connector;
pub mod coordinator;
pub mod endpoint;
pub mod error;
pub mod message;
pub mod metadata;
pub mod node;
pub mod result;
pub mod session;

#[cfg(test)]
mod testutil;

pub use connector::{connect, connect_with_config, PeerStream};
pub use coordinator::{CaptureCoordinator, CoordinatorConfig};
pub use endpoint::Endpoint;
pub use error::{CaptureError, CoordinatorError, Result, SourceError};
pub use message::Message;
pub use metadata::{
    CaptureFailure, CaptureRequest, Completion, FrameMetadata, Resolution, ResolutionError,
    SensorInfo, TransferLayout, DEFAULT_FORMAT, DEFAULT_RESOLUTION,
};
pub use node::{CaptureSource, FileSource, NodeConfig, NodeServer, SourceCapture, DEFAULT_CHUNK_SIZE};
pub use result::{
    capture_timestamp, CaptureResult, CaptureSet, CapturedFrame, EndpointResult, TIMESTAMP_FORMAT,
};
pub use session::{
    PeerSession, SessionConfig, SessionPhase, Transfer, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_MAX_TRANSFER, DEFAULT_PHASE_TIMEOUT,
};
pub use tokio_util::sync::CancellationToken;
