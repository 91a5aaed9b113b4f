//! Stream supervision
//!
//! This module implements the per-stream lifecycle:
//! - Registry of live streams, the only state shared between tasks
//! - Liveness monitor restarting ffmpeg after unexpected exits
//! - Thumbnail sampler refreshing a preview image
//! - Supervisor façade exposing start, stop and elapsed

pub mod artifacts;
pub mod monitor;
pub mod registry;
pub mod sampler;
pub mod supervisor;
pub mod types;

pub use artifacts::StreamArtifacts;
pub use registry::{Registry, StreamHandle};
pub use supervisor::Supervisor;
pub use types::{
    format_duration, OverlaySpec, StreamEvent, StreamId, StreamInfo, StreamRequest, StreamState,
};
