//! Liveness monitor
//!
//! One task per stream. Polls the current process and relaunches it in place
//! when it exits without a stop having been requested. The stream's id and
//! original start time are untouched by a relaunch.
//!
//! Failed relaunches back off exponentially; after the configured number of
//! consecutive failures the stream is marked `Failed` and the monitor exits,
//! leaving the registry entry for `stop` to clean up.

use super::registry::StreamHandle;
use super::types::{StreamEvent, StreamState};
use crate::config::SupervisorConfig;
use crate::ffmpeg::{build_stream_command, launch, LogMode};
use crate::utils::{SupervisorError, SupervisorResult};
use std::sync::Arc;
use tokio::process::Child;
use tokio::sync::broadcast;

/// What the monitor needs to watch one stream
pub struct MonitorContext {
    pub config: Arc<SupervisorConfig>,
    pub handle: Arc<StreamHandle>,
    pub events: broadcast::Sender<StreamEvent>,
}

/// Outcome of a relaunch sequence
enum Relaunch {
    Running,
    Cancelled,
    GaveUp,
}

/// Run until the stream is cancelled or relaunching gives up
pub async fn run(ctx: MonitorContext) {
    let handle = &ctx.handle;
    let poll = ctx.config.poll_interval();

    tracing::debug!("Monitor started for stream {}", handle.id);

    loop {
        tokio::select! {
            biased;
            _ = handle.cancel.cancelled() => break,
            _ = tokio::time::sleep(poll) => {}
        }

        let status = handle.process.lock().await.try_wait();
        match status {
            Ok(None) => continue,
            Err(e) => {
                tracing::warn!("Failed to poll stream {}: {}", handle.id, e);
                continue;
            }
            Ok(Some(status)) => {
                if handle.cancel.is_cancelled() {
                    break;
                }
                tracing::warn!("Stream {} process exited unexpectedly ({}), restarting", handle.id, status);
                handle.set_state(StreamState::Restarting);

                match relaunch_with_backoff(&ctx).await {
                    Relaunch::Running => continue,
                    Relaunch::Cancelled | Relaunch::GaveUp => break,
                }
            }
        }
    }

    tracing::debug!("Monitor stopped for stream {}", handle.id);
}

async fn relaunch_with_backoff(ctx: &MonitorContext) -> Relaunch {
    let handle = &ctx.handle;
    let policy = &ctx.config.restart;
    let mut failures = 0u32;

    loop {
        if handle.cancel.is_cancelled() {
            return Relaunch::Cancelled;
        }

        match relaunch(ctx).await {
            Ok(child) => return install(ctx, child).await,
            Err(_) if handle.cancel.is_cancelled() => return Relaunch::Cancelled,
            Err(e) => {
                failures += 1;
                tracing::warn!(
                    "Stream {} relaunch {}/{} failed: {}",
                    handle.id,
                    failures,
                    policy.max_consecutive_failures,
                    e
                );
                let _ = ctx.events.send(StreamEvent::RestartFailed {
                    id: handle.id.clone(),
                    error: e.to_string(),
                });

                if failures >= policy.max_consecutive_failures {
                    tracing::error!(
                        "Stream {} gave up after {} failed relaunches; stop it to clean up",
                        handle.id,
                        failures
                    );
                    handle.set_state(StreamState::Failed);
                    let _ = ctx.events.send(StreamEvent::GaveUp(handle.id.clone()));
                    return Relaunch::GaveUp;
                }

                tokio::select! {
                    biased;
                    _ = handle.cancel.cancelled() => return Relaunch::Cancelled,
                    _ = tokio::time::sleep(policy.backoff(failures)) => {}
                }
            }
        }
    }
}

/// Rebuild the command from the stream's fixed parameters and launch it
async fn relaunch(ctx: &MonitorContext) -> SupervisorResult<Child> {
    let handle = &ctx.handle;
    let command = build_stream_command(
        &ctx.config,
        &handle.request.source,
        &handle.destination,
        &handle.overlay,
    );
    launch(
        &command,
        &handle.artifacts.log,
        LogMode::Append,
        ctx.config.launch_grace(),
        &handle.cancel,
    )
    .await
    .map_err(|e| SupervisorError::Restart(e.to_string()))
}

/// Swap the fresh process into the handle unless a stop arrived meanwhile
async fn install(ctx: &MonitorContext, mut child: Child) -> Relaunch {
    let handle = &ctx.handle;
    let mut process = handle.process.lock().await;

    if handle.cancel.is_cancelled() {
        drop(process);
        // Never installed, so nothing else will reap it
        if let Err(e) = child.kill().await {
            tracing::warn!("Failed to kill relaunched process for stream {}: {}", handle.id, e);
        }
        return Relaunch::Cancelled;
    }

    *process = child;
    drop(process);

    let restarts = handle.record_restart();
    handle.set_state(StreamState::Running);
    tracing::info!("Stream {} restarted (restart #{})", handle.id, restarts);
    let _ = ctx.events.send(StreamEvent::Restarted {
        id: handle.id.clone(),
        restarts,
    });
    Relaunch::Running
}
