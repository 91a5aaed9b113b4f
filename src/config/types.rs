//! Supervisor configuration types
//!
//! Every field has a default, so an empty JSON object is a valid config.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::utils::{SupervisorError, SupervisorResult};

/// How the outgoing media is produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "mode")]
pub enum EncodingMode {
    /// Re-encode to a widely compatible codec pair
    #[serde(rename_all = "camelCase")]
    Transcode {
        #[serde(default = "default_video_codec")]
        video_codec: String,
        #[serde(default = "default_preset")]
        preset: String,
        #[serde(default = "default_audio_codec")]
        audio_codec: String,
    },
    /// Copy the source streams untouched
    Copy,
}

impl Default for EncodingMode {
    fn default() -> Self {
        Self::Transcode {
            video_codec: default_video_codec(),
            preset: default_preset(),
            audio_codec: default_audio_codec(),
        }
    }
}

pub(crate) fn default_video_codec() -> String {
    "libx264".to_string()
}

pub(crate) fn default_preset() -> String {
    "veryfast".to_string()
}

fn default_audio_codec() -> String {
    "aac".to_string()
}

/// Relaunch policy applied by the liveness monitor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RestartPolicy {
    /// Consecutive failed relaunches tolerated before the stream is marked failed
    pub max_consecutive_failures: u32,
    /// First backoff after a failed relaunch
    pub backoff_initial_ms: u64,
    /// Upper bound for the doubling backoff
    pub backoff_max_ms: u64,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            max_consecutive_failures: 5,
            backoff_initial_ms: 1_000,
            backoff_max_ms: 30_000,
        }
    }
}

impl RestartPolicy {
    /// Backoff to wait after the `failures`-th consecutive failure (1-based)
    pub fn backoff(&self, failures: u32) -> Duration {
        let shift = failures.saturating_sub(1).min(16);
        let ms = self
            .backoff_initial_ms
            .saturating_mul(1u64 << shift)
            .min(self.backoff_max_ms);
        Duration::from_millis(ms)
    }
}

/// Configuration for a `Supervisor`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SupervisorConfig {
    /// Path or name of the ffmpeg executable
    pub ffmpeg_path: String,

    /// Directory holding per-stream logs, thumbnails and overlay assets
    pub work_dir: PathBuf,

    /// Output encoding
    pub encoding: EncodingMode,

    /// `-loglevel` handed to ffmpeg
    pub log_level: String,

    /// Upper bound on ffmpeg's reconnect delay (seconds)
    pub reconnect_delay_max_secs: u32,

    /// How long a fresh process must survive to count as launched
    pub launch_grace_ms: u64,

    /// Liveness monitor poll period
    pub poll_interval_ms: u64,

    /// Thumbnail sampling period
    pub sample_interval_ms: u64,

    /// Bound on a single thumbnail capture
    pub sample_timeout_ms: u64,

    /// Bound on waiting for the background tasks during `stop`
    pub stop_join_timeout_ms: u64,

    /// Bound on waiting for the process after SIGTERM during `stop`
    pub terminate_timeout_ms: u64,

    /// Bound on fetching an overlay image
    pub fetch_timeout_ms: u64,

    /// Font used by text overlays
    pub font_file: Option<PathBuf>,

    /// Relaunch policy
    pub restart: RestartPolicy,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "ffmpeg".to_string(),
            work_dir: std::env::temp_dir(),
            encoding: EncodingMode::default(),
            log_level: "error".to_string(),
            reconnect_delay_max_secs: 5,
            launch_grace_ms: 1_000,
            poll_interval_ms: 3_000,
            sample_interval_ms: 5_000,
            sample_timeout_ms: 2_000,
            stop_join_timeout_ms: 2_000,
            terminate_timeout_ms: 5_000,
            fetch_timeout_ms: 10_000,
            font_file: None,
            restart: RestartPolicy::default(),
        }
    }
}

impl SupervisorConfig {
    pub fn launch_grace(&self) -> Duration {
        Duration::from_millis(self.launch_grace_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn sample_timeout(&self) -> Duration {
        Duration::from_millis(self.sample_timeout_ms)
    }

    pub fn stop_join_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_join_timeout_ms)
    }

    pub fn terminate_timeout(&self) -> Duration {
        Duration::from_millis(self.terminate_timeout_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Reject configurations that would break the shutdown or sampling bounds
    pub fn validate(&self) -> SupervisorResult<()> {
        if self.ffmpeg_path.trim().is_empty() {
            return Err(SupervisorError::InvalidConfig(
                "ffmpegPath must not be empty".to_string(),
            ));
        }

        let intervals = [
            ("pollIntervalMs", self.poll_interval_ms),
            ("sampleIntervalMs", self.sample_interval_ms),
            ("sampleTimeoutMs", self.sample_timeout_ms),
            ("stopJoinTimeoutMs", self.stop_join_timeout_ms),
            ("terminateTimeoutMs", self.terminate_timeout_ms),
            ("fetchTimeoutMs", self.fetch_timeout_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(SupervisorError::InvalidConfig(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }

        if self.sample_timeout_ms >= self.sample_interval_ms {
            return Err(SupervisorError::InvalidConfig(format!(
                "sampleTimeoutMs ({}) must be below sampleIntervalMs ({})",
                self.sample_timeout_ms, self.sample_interval_ms
            )));
        }

        if self.restart.backoff_initial_ms > self.restart.backoff_max_ms {
            return Err(SupervisorError::InvalidConfig(
                "restart.backoffInitialMs must not exceed restart.backoffMaxMs".to_string(),
            ));
        }

        Ok(())
    }
}
