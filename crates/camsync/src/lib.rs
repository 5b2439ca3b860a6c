//! Synchronized capture across networked camera endpoints, with raw sensor
//! reconstruction.
//!
//! # Crate Structure
//!
//! - [`raw`]: 10-bit unpacking, Bayer demosaic, plane isolation
//! - [`frame`]: Length-prefixed event framing for the capture protocol
//! - [`peer`]: Peer sessions, the capture coordinator, and the endpoint node

/// Re-export raw reconstruction types.
pub mod raw {
    pub use camsync_raw::*;
}

/// Re-export frame types.
pub mod frame {
    pub use camsync_frame::*;
}

/// Re-export peer types.
pub mod peer {
    pub use camsync_peer::*;
}

pub use camsync_peer::{CaptureCoordinator, CaptureSet, CoordinatorConfig, Endpoint};
pub use camsync_raw::{reconstruct, ReconstructParams, ReconstructedImage};
