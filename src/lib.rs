//! Restream Supervisor - keeps ffmpeg restreams alive.
//!
//! This is the main library crate. It launches one ffmpeg process per
//! logical stream, restarts it when it dies unexpectedly, samples preview
//! thumbnails, and tears everything down on request.

pub mod cli;
pub mod config;
pub mod ffmpeg;
pub mod overlay;
pub mod stream;
pub mod utils;

pub use config::SupervisorConfig;
pub use stream::{StreamEvent, StreamId, StreamInfo, StreamRequest, StreamState, Supervisor};
pub use utils::{SupervisorError, SupervisorResult};

use anyhow::Context;
use clap::Parser;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often the binary reports a running stream's elapsed time
const REPORT_INTERVAL: Duration = Duration::from_secs(60);

/// Install the global tracing subscriber
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "restream_supervisor=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Run the binary: start one stream and supervise it until Ctrl-C
pub async fn run() -> anyhow::Result<()> {
    let args = cli::Args::parse();
    init_tracing();

    tracing::info!("Starting Restream Supervisor v{}", env!("CARGO_PKG_VERSION"));

    let config = match &args.config {
        Some(path) => config::load(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => SupervisorConfig::default(),
    };
    let supervisor = Supervisor::new(config).context("Failed to create supervisor")?;

    let id = supervisor
        .start(args.request())
        .await
        .context("Failed to start stream")?;
    tracing::info!("Stream started with ID: {}", id);

    let mut events = supervisor.subscribe();
    let mut report = tokio::time::interval(REPORT_INTERVAL);
    report.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
            _ = report.tick() => {
                if let Some(elapsed) = supervisor.elapsed(&id) {
                    tracing::info!("Stream {} running for {}", id, stream::format_duration(elapsed));
                }
            }
            event = events.recv() => match event {
                Ok(StreamEvent::GaveUp(failed)) => {
                    tracing::error!("Stream {} could not be kept alive", failed);
                    break;
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    supervisor.shutdown().await;
    Ok(())
}
