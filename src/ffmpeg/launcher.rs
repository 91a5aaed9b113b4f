//! ffmpeg process launching and termination
//!
//! The launched process writes all of its diagnostics to the stream's log
//! artifact. A process that dies within the grace window is treated as a
//! failed launch and its log is read back into the error. Cancelling during
//! the grace window kills the process before `launch` returns.

use super::command::FfmpegCommand;
use crate::utils::{SupervisorError, SupervisorResult};
use std::fs::OpenOptions;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

/// How the log artifact is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogMode {
    /// First launch: start a fresh log
    Truncate,
    /// Restart: keep the history of earlier runs
    Append,
}

/// Spawn `command` and confirm it survives `grace`
pub async fn launch(
    command: &FfmpegCommand,
    log_path: &Path,
    mode: LogMode,
    grace: Duration,
    cancel: &CancellationToken,
) -> SupervisorResult<Child> {
    let mut options = OpenOptions::new();
    options.create(true);
    match mode {
        LogMode::Truncate => options.write(true).truncate(true),
        LogMode::Append => options.append(true),
    };
    let stdout_log = options
        .open(log_path)
        .map_err(|e| SupervisorError::Launch(format!("Failed to open log {:?}: {}", log_path, e)))?;
    let stderr_log = stdout_log
        .try_clone()
        .map_err(|e| SupervisorError::Launch(format!("Failed to open log {:?}: {}", log_path, e)))?;

    tracing::debug!("Starting {}: {:?}", command.program, command.args);

    let mut child = Command::new(&command.program)
        .args(&command.args)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout_log))
        .stderr(Stdio::from(stderr_log))
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| SupervisorError::Launch(format!("Failed to start {}: {}", command.program, e)))?;

    tokio::select! {
        biased;
        _ = cancel.cancelled() => {
            let _ = child.kill().await;
            return Err(SupervisorError::Launch(format!(
                "{} launch cancelled",
                command.program
            )));
        }
        _ = tokio::time::sleep(grace) => {}
    }

    match child.try_wait() {
        Ok(None) => {
            tracing::debug!("{} running with pid {:?}", command.program, child.id());
            Ok(child)
        }
        Ok(Some(status)) => {
            let diagnostics = tokio::fs::read_to_string(log_path).await.unwrap_or_default();
            Err(SupervisorError::Launch(format!(
                "{} exited immediately ({}): {}",
                command.program,
                status,
                diagnostics.trim()
            )))
        }
        Err(e) => {
            // kill_on_drop covers this too, but reap it explicitly
            let _ = child.kill().await;
            Err(SupervisorError::Launch(format!(
                "Failed to query {} status: {}",
                command.program, e
            )))
        }
    }
}

/// Ask the process to exit, escalating to a kill after `timeout`
pub async fn terminate(child: &mut Child, timeout: Duration) -> std::io::Result<()> {
    if child.try_wait()?.is_some() {
        return Ok(());
    }

    if !send_terminate(child) {
        return child.kill().await;
    }

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => {
            tracing::debug!("Process exited after terminate: {:?}", status);
            status.map(|_| ())
        }
        Err(_) => {
            tracing::warn!(
                "Process {:?} ignored terminate for {:?}, killing",
                child.id(),
                timeout
            );
            child.kill().await
        }
    }
}

#[cfg(unix)]
fn send_terminate(child: &mut Child) -> bool {
    match child.id() {
        // SAFETY: plain signal delivery to a pid we own and have not reaped
        Some(pid) => unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) == 0 },
        None => false,
    }
}

#[cfg(not(unix))]
fn send_terminate(child: &mut Child) -> bool {
    child.start_kill().is_ok()
}
