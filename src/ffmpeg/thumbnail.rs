//! Single-frame preview capture

use super::command::build_thumbnail_command;
use crate::config::SupervisorConfig;
use crate::utils::{SupervisorError, SupervisorResult};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Capture one frame from `source` into `thumbnail`
///
/// The frame is written to `partial` first and renamed into place, so a
/// failed capture leaves the previous preview untouched. The capture process
/// is killed if it outlives the configured timeout.
pub async fn capture_frame(
    config: &SupervisorConfig,
    source: &str,
    partial: &Path,
    thumbnail: &Path,
) -> SupervisorResult<()> {
    let command = build_thumbnail_command(config, source, partial);

    let run = Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = tokio::time::timeout(config.sample_timeout(), run)
        .await
        .map_err(|_| {
            SupervisorError::Sample(format!("timed out after {:?}", config.sample_timeout()))
        })?
        .map_err(|e| SupervisorError::Sample(format!("Failed to start {}: {}", command.program, e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let _ = tokio::fs::remove_file(partial).await;
        return Err(SupervisorError::Sample(format!(
            "{} exited with {}: {}",
            command.program,
            output.status,
            stderr.trim()
        )));
    }

    tokio::fs::rename(partial, thumbnail)
        .await
        .map_err(|e| SupervisorError::Sample(format!("No frame written to {:?}: {}", partial, e)))?;

    Ok(())
}
