//! Stream data model
//!
//! Identifiers, requests, states and events shared by the supervisor and
//! its background tasks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Opaque stream identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(String);

impl StreamId {
    /// Generate a fresh identifier
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for StreamId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Optional visual elements composited onto the outgoing video
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlaySpec {
    /// Image URL (http, https, file) or local path
    pub image: Option<String>,

    /// Text drawn over the video
    pub text: Option<String>,
}

impl OverlaySpec {
    pub fn is_empty(&self) -> bool {
        self.image.is_none() && self.text.is_none()
    }
}

/// Request to start a stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRequest {
    /// Media source (usually an HLS playlist URL)
    pub source: String,

    /// Destination endpoint, e.g. `rtmp://host/live`
    pub destination_url: String,

    /// Stream key appended to the destination
    pub destination_key: String,

    /// Human readable title
    pub title: String,

    #[serde(default)]
    pub overlay: OverlaySpec,
}

impl StreamRequest {
    pub fn new(
        source: impl Into<String>,
        destination_url: impl Into<String>,
        destination_key: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            destination_url: destination_url.into(),
            destination_key: destination_key.into(),
            title: title.into(),
            overlay: OverlaySpec::default(),
        }
    }

    pub fn with_overlay(mut self, overlay: OverlaySpec) -> Self {
        self.overlay = overlay;
        self
    }
}

/// Liveness state of a registered stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    /// Process is alive
    Running,
    /// Process exited unexpectedly and a relaunch is in progress
    Restarting,
    /// Relaunching gave up; the stream stays dead until stopped
    Failed,
    /// Stop in progress; the entry leaves the registry once torn down
    Stopping,
}

impl Default for StreamState {
    fn default() -> Self {
        Self::Running
    }
}

/// Snapshot of a registered stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInfo {
    pub id: StreamId,
    pub title: String,
    pub source: String,
    pub destination: String,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub restarts: u32,
    pub state: StreamState,
    /// Pid of the current ffmpeg process
    pub pid: Option<u32>,
    /// Preview image, if one has been captured
    pub thumbnail: Option<PathBuf>,
}

/// Events emitted by the supervisor
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Stream launched and registered
    Started(StreamId),
    /// Process died and was relaunched
    Restarted { id: StreamId, restarts: u32 },
    /// A relaunch attempt failed
    RestartFailed { id: StreamId, error: String },
    /// Relaunching stopped after too many consecutive failures
    GaveUp(StreamId),
    /// A fresh preview image was written
    ThumbnailUpdated(StreamId),
    /// Stream stopped and its artifacts removed
    Stopped(StreamId),
}

/// Format a duration as `"Hh Mm Ss"`
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}
