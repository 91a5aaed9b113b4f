//! Thumbnail sampler
//!
//! One task per stream. Captures a frame immediately and then once per
//! sampling period. Failures are swallowed: the previous preview stays in
//! place and the stream is never affected.

use super::registry::StreamHandle;
use super::types::StreamEvent;
use crate::config::SupervisorConfig;
use crate::ffmpeg::capture_frame;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

pub struct SamplerContext {
    pub config: Arc<SupervisorConfig>,
    pub handle: Arc<StreamHandle>,
    pub events: broadcast::Sender<StreamEvent>,
}

pub async fn run(ctx: SamplerContext) {
    let handle = &ctx.handle;
    let artifacts = &handle.artifacts;

    // First tick fires immediately
    let mut ticker = tokio::time::interval(ctx.config.sample_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = handle.cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let capture = capture_frame(
            &ctx.config,
            &handle.request.source,
            &artifacts.thumbnail_partial,
            &artifacts.thumbnail,
        );

        // Dropping an in-flight capture kills its process
        tokio::select! {
            biased;
            _ = handle.cancel.cancelled() => break,
            result = capture => match result {
                Ok(()) => {
                    tracing::debug!("Thumbnail updated for stream {}", handle.id);
                    let _ = ctx.events.send(StreamEvent::ThumbnailUpdated(handle.id.clone()));
                }
                Err(e) => tracing::debug!("Thumbnail skipped for stream {}: {}", handle.id, e),
            }
        }
    }

    tracing::debug!("Sampler stopped for stream {}", handle.id);
}
