//! Stream supervisor
//!
//! The façade collaborators use to start, stop and inspect streams. It
//! coordinates the registry, the launcher and the two background tasks each
//! stream owns.

use super::artifacts::StreamArtifacts;
use super::monitor::{self, MonitorContext};
use super::registry::{Registry, StreamEntry, StreamHandle, StreamTasks};
use super::sampler::{self, SamplerContext};
use super::types::{StreamEvent, StreamId, StreamInfo, StreamRequest, StreamState};
use crate::config::SupervisorConfig;
use crate::ffmpeg::{build_stream_command, join_destination, launch, terminate, LogMode};
use crate::overlay::{self, AssetFetcher, OverlayFetcher};
use crate::utils::{SupervisorError, SupervisorResult};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

struct Inner {
    config: Arc<SupervisorConfig>,
    registry: Registry,
    fetcher: Arc<dyn AssetFetcher>,
    event_tx: broadcast::Sender<StreamEvent>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        // Tasks exit, drop their handles, and kill_on_drop reaps the processes
        self.registry.cancel_all();
    }
}

/// Supervises restream processes
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    /// Create a supervisor with the default overlay fetcher
    pub fn new(config: SupervisorConfig) -> SupervisorResult<Self> {
        let fetcher = OverlayFetcher::new(config.fetch_timeout())?;
        Self::with_fetcher(config, Arc::new(fetcher))
    }

    /// Create a supervisor with a custom overlay fetcher
    pub fn with_fetcher(
        config: SupervisorConfig,
        fetcher: Arc<dyn AssetFetcher>,
    ) -> SupervisorResult<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.work_dir)?;

        let (event_tx, _) = broadcast::channel(100);
        Ok(Self {
            inner: Arc::new(Inner {
                config: Arc::new(config),
                registry: Registry::new(),
                fetcher,
                event_tx,
            }),
        })
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    /// Subscribe to stream events
    pub fn subscribe(&self) -> broadcast::Receiver<StreamEvent> {
        self.inner.event_tx.subscribe()
    }

    /// Start a stream
    ///
    /// Fails without registering anything if the overlay cannot be fetched
    /// or ffmpeg does not survive its launch grace period.
    pub async fn start(&self, request: StreamRequest) -> SupervisorResult<StreamId> {
        validate_request(&request)?;

        let config = &self.inner.config;
        let id = StreamId::new();
        let mut artifacts = StreamArtifacts::new(&config.work_dir, &id);

        tracing::info!("Starting stream {} ('{}') from {}", id, request.title, request.source);

        let (overlay, overlay_image) = match overlay::resolve(
            self.inner.fetcher.as_ref(),
            &config.work_dir,
            &id,
            &request.overlay,
        )
        .await
        {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::warn!("Stream {} not started: {}", id, e);
                return Err(e);
            }
        };
        artifacts.overlay = overlay_image;

        let destination = join_destination(&request.destination_url, &request.destination_key);
        let command = build_stream_command(config, &request.source, &destination, &overlay);

        let cancel = CancellationToken::new();
        let child = match launch(
            &command,
            &artifacts.log,
            LogMode::Truncate,
            config.launch_grace(),
            &cancel,
        )
        .await
        {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!("Stream {} not started: {}", id, e);
                artifacts.remove_all().await;
                return Err(e);
            }
        };

        let handle = Arc::new(StreamHandle::new(
            id.clone(),
            request,
            destination,
            overlay,
            artifacts,
            child,
            cancel,
        ));

        let monitor = tokio::spawn(monitor::run(MonitorContext {
            config: Arc::clone(config),
            handle: Arc::clone(&handle),
            events: self.inner.event_tx.clone(),
        }));
        let sampler = tokio::spawn(sampler::run(SamplerContext {
            config: Arc::clone(config),
            handle: Arc::clone(&handle),
            events: self.inner.event_tx.clone(),
        }));

        self.inner
            .registry
            .insert(StreamEntry::new(handle, StreamTasks { monitor, sampler }));

        tracing::info!("Stream {} started", id);
        let _ = self.inner.event_tx.send(StreamEvent::Started(id.clone()));
        Ok(id)
    }

    /// Stop a stream and remove its artifacts
    ///
    /// Returns `false` if the id is unknown or another stop already owns it.
    /// Cancellation is signalled before the process is terminated so the
    /// monitor never restarts a deliberate stop. The stream stays registered,
    /// in the `Stopping` state, until its process has exited.
    pub async fn stop(&self, id: &StreamId) -> bool {
        let Some((handle, tasks)) = self.inner.registry.claim(id) else {
            return false;
        };
        let config = &self.inner.config;

        tracing::info!("Stopping stream {}", id);
        handle.set_state(StreamState::Stopping);
        handle.cancel.cancel();

        let join_timeout = config.stop_join_timeout();
        let joined = tokio::time::timeout(join_timeout, async {
            let _ = tokio::join!(tasks.monitor, tasks.sampler);
        })
        .await;
        if joined.is_err() {
            tracing::warn!(
                "Background tasks of stream {} did not finish within {:?}",
                id,
                join_timeout
            );
        }

        {
            let mut process = handle.process.lock().await;
            if let Err(e) = terminate(&mut process, config.terminate_timeout()).await {
                tracing::warn!("Failed to terminate stream {}: {}", id, e);
            }
        }

        self.inner.registry.remove(id);
        handle.artifacts.remove_all().await;

        tracing::info!("Stream {} stopped after {:?}", id, handle.elapsed());
        let _ = self.inner.event_tx.send(StreamEvent::Stopped(id.clone()));
        true
    }

    /// Time since the stream was originally started
    pub fn elapsed(&self, id: &StreamId) -> Option<Duration> {
        self.inner.registry.get(id).map(|h| h.elapsed())
    }

    pub fn status(&self, id: &StreamId) -> Option<StreamState> {
        self.inner.registry.get(id).map(|h| h.state())
    }

    /// Preview image of a stream, if one has been captured
    pub fn thumbnail(&self, id: &StreamId) -> Option<PathBuf> {
        let handle = self.inner.registry.get(id)?;
        let path = &handle.artifacts.thumbnail;
        path.exists().then(|| path.clone())
    }

    pub async fn info(&self, id: &StreamId) -> Option<StreamInfo> {
        let handle = self.inner.registry.get(id)?;
        Some(handle.info().await)
    }

    /// Snapshot of every registered stream, oldest first
    pub async fn list(&self) -> Vec<StreamInfo> {
        let mut streams = Vec::new();
        for handle in self.inner.registry.handles() {
            streams.push(handle.info().await);
        }
        streams.sort_by_key(|s| s.started_at);
        streams
    }

    /// Stop every registered stream
    ///
    /// Streams already being stopped elsewhere are left to that caller.
    pub async fn shutdown(&self) {
        if self.inner.registry.is_empty() {
            return;
        }
        let ids = self.inner.registry.ids();
        tracing::info!("Shutting down {} stream(s)", ids.len());

        let mut stops = JoinSet::new();
        for id in ids {
            let supervisor = self.clone();
            stops.spawn(async move { supervisor.stop(&id).await });
        }
        while stops.join_next().await.is_some() {}
    }
}

fn validate_request(request: &StreamRequest) -> SupervisorResult<()> {
    let fields = [
        ("source", &request.source),
        ("destination url", &request.destination_url),
        ("destination key", &request.destination_key),
        ("title", &request.title),
    ];
    for (name, value) in fields {
        if value.trim().is_empty() {
            return Err(SupervisorError::InvalidRequest(format!("{} must not be empty", name)));
        }
    }
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::config::RestartPolicy;
    use crate::stream::OverlaySpec;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::{tempdir, TempDir};
    use tokio::sync::broadcast::error::RecvError;

    /// Stand-in for ffmpeg.
    ///
    /// Frame captures write the output file unless `thumb_fail` exists.
    /// Streams exit immediately for the source `broken` or while
    /// `launch_fail` exists, and otherwise record their pid in `pids` and
    /// sleep. While `ignore_term` exists they also ignore SIGTERM.
    const FAKE_FFMPEG: &str = r#"#!/bin/sh
dir=$(dirname "$0")
src=""
prev=""
for arg in "$@"; do
  if [ "$prev" = "-i" ] && [ -z "$src" ]; then src="$arg"; fi
  prev="$arg"
done
case "$*" in
  *-frames:v*)
    if [ -e "$dir/thumb_fail" ]; then echo "$src: Connection refused" >&2; exit 1; fi
    echo frame > "$arg"
    exit 0
    ;;
esac
if [ "$src" = "broken" ]; then echo "$src: No such file or directory" >&2; exit 1; fi
if [ -e "$dir/launch_fail" ]; then echo "relaunch refused" >&2; exit 1; fi
echo $$ >> "$dir/pids"
if [ -e "$dir/ignore_term" ]; then trap '' TERM; fi
echo "streaming $src"
exec sleep 600
"#;

    struct Fixture {
        dir: TempDir,
        supervisor: Supervisor,
    }

    impl Fixture {
        fn new() -> Self {
            Self::with_config(|_| {})
        }

        fn with_restart(restart: RestartPolicy) -> Self {
            Self::with_config(|config| config.restart = restart)
        }

        fn with_config(adjust: impl FnOnce(&mut SupervisorConfig)) -> Self {
            let dir = tempdir().unwrap();
            let tool = dir.path().join("ffmpeg");
            std::fs::write(&tool, FAKE_FFMPEG).unwrap();
            std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

            let mut config = SupervisorConfig {
                ffmpeg_path: tool.to_string_lossy().to_string(),
                work_dir: dir.path().join("work"),
                launch_grace_ms: 100,
                poll_interval_ms: 100,
                sample_interval_ms: 300,
                sample_timeout_ms: 250,
                stop_join_timeout_ms: 1_000,
                terminate_timeout_ms: 1_000,
                restart: RestartPolicy {
                    max_consecutive_failures: 3,
                    backoff_initial_ms: 50,
                    backoff_max_ms: 200,
                },
                ..Default::default()
            };
            adjust(&mut config);
            let supervisor = Supervisor::new(config).unwrap();
            Self { dir, supervisor }
        }

        fn flag(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        fn work_dir(&self) -> &Path {
            &self.supervisor.config().work_dir
        }

        fn request(&self, source: &str) -> StreamRequest {
            StreamRequest::new(source, "rtmp://host/live", "key123", "Title")
        }

        /// Every stream process the fake ffmpeg has started
        fn launched_pids(&self) -> Vec<u32> {
            std::fs::read_to_string(self.flag("pids"))
                .unwrap_or_default()
                .lines()
                .map(|line| line.trim().parse().unwrap())
                .collect()
        }
    }

    fn drain(rx: &mut broadcast::Receiver<StreamEvent>) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn is_alive(pid: u32) -> bool {
        unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
    }

    async fn wait_for<F>(rx: &mut broadcast::Receiver<StreamEvent>, matches: F) -> StreamEvent
    where
        F: Fn(&StreamEvent) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                match rx.recv().await {
                    Ok(event) if matches(&event) => return event,
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => panic!("event channel closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for event")
    }

    fn kill(pid: u32) {
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGKILL);
        }
    }

    #[tokio::test]
    async fn test_start_elapsed_stop() {
        let fx = Fixture::new();
        let mut events = fx.supervisor.subscribe();
        let id = fx.supervisor.start(fx.request("src.m3u8")).await.unwrap();

        let elapsed = fx.supervisor.elapsed(&id).unwrap();
        assert!(elapsed < Duration::from_secs(1));
        assert_eq!(fx.supervisor.status(&id), Some(StreamState::Running));

        let artifacts = StreamArtifacts::new(fx.work_dir(), &id);
        assert!(artifacts.log.exists());

        assert!(fx.supervisor.stop(&id).await);
        assert!(fx.supervisor.elapsed(&id).is_none());
        assert!(!artifacts.log.exists());
        assert!(!artifacts.thumbnail.exists());
        assert!(!artifacts.thumbnail_partial.exists());
        assert!(fx.supervisor.list().await.is_empty());

        // A deliberate stop is never mistaken for a crash
        let events = drain(&mut events);
        assert!(events.iter().any(|e| matches!(e, StreamEvent::Started(_))));
        assert!(matches!(events.last(), Some(StreamEvent::Stopped(_))));
        assert!(!events.iter().any(|e| matches!(
            e,
            StreamEvent::Restarted { .. } | StreamEvent::RestartFailed { .. }
        )));
        assert!(fx.launched_pids().iter().all(|pid| !is_alive(*pid)));
    }

    #[tokio::test]
    async fn test_stream_stays_registered_while_stopping() {
        let fx = Fixture::with_config(|config| config.terminate_timeout_ms = 2_000);
        std::fs::write(fx.flag("ignore_term"), b"").unwrap();
        let id = fx.supervisor.start(fx.request("src.m3u8")).await.unwrap();
        let log = StreamArtifacts::new(fx.work_dir(), &id).log;

        let supervisor = fx.supervisor.clone();
        let stop_id = id.clone();
        let stopping = tokio::spawn(async move { supervisor.stop(&stop_id).await });

        // The process ignores SIGTERM, so teardown is parked in terminate
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(fx.supervisor.status(&id), Some(StreamState::Stopping));
        assert!(fx.supervisor.elapsed(&id).is_some());
        assert!(log.exists());

        let listed = tokio::time::timeout(Duration::from_millis(500), fx.supervisor.list())
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].pid.is_none());

        // Teardown is already owned by the first stop
        assert!(!fx.supervisor.stop(&id).await);

        assert!(stopping.await.unwrap());
        assert!(fx.supervisor.status(&id).is_none());
        assert!(!log.exists());
        assert!(fx.launched_pids().iter().all(|pid| !is_alive(*pid)));
    }

    #[tokio::test]
    async fn test_stop_during_relaunch_leaves_no_process() {
        let fx = Fixture::with_config(|config| {
            config.launch_grace_ms = 1_500;
            config.stop_join_timeout_ms = 500;
        });
        let mut events = fx.supervisor.subscribe();
        let id = fx.supervisor.start(fx.request("src.m3u8")).await.unwrap();
        let pid = fx.supervisor.info(&id).await.unwrap().pid.unwrap();

        kill(pid);
        // Monitor notices within a poll and is now inside the relaunch grace
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(fx.supervisor.status(&id), Some(StreamState::Restarting));

        assert!(fx.supervisor.stop(&id).await);
        assert!(fx.supervisor.status(&id).is_none());

        let pids = fx.launched_pids();
        assert_eq!(pids.len(), 2);
        assert!(pids.iter().all(|pid| !is_alive(*pid)));

        let events = drain(&mut events);
        assert!(!events.iter().any(|e| matches!(
            e,
            StreamEvent::Restarted { .. } | StreamEvent::RestartFailed { .. }
        )));
    }

    #[tokio::test]
    async fn test_stop_unknown_is_false() {
        let fx = Fixture::new();
        let other = fx.supervisor.start(fx.request("src.m3u8")).await.unwrap();

        assert!(!fx.supervisor.stop(&StreamId::from("nope")).await);
        assert_eq!(fx.supervisor.status(&other), Some(StreamState::Running));

        assert!(fx.supervisor.stop(&other).await);
        assert!(!fx.supervisor.stop(&other).await);
    }

    #[tokio::test]
    async fn test_launch_failure_registers_nothing() {
        let fx = Fixture::new();
        let err = fx.supervisor.start(fx.request("broken")).await.unwrap_err();

        match err {
            SupervisorError::Launch(message) => assert!(message.contains("No such file")),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(fx.supervisor.list().await.is_empty());
        let leftovers = std::fs::read_dir(fx.work_dir()).unwrap().count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_overlay_fetch_failure_registers_nothing() {
        let fx = Fixture::new();
        let request = fx.request("src.m3u8").with_overlay(OverlaySpec {
            image: Some("/definitely/missing/logo.png".to_string()),
            text: None,
        });

        let err = fx.supervisor.start(request).await.unwrap_err();
        assert!(matches!(err, SupervisorError::Fetch(_)));
        assert!(fx.supervisor.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_empty_request_rejected() {
        let fx = Fixture::new();
        let err = fx
            .supervisor
            .start(StreamRequest::new("src", "rtmp://host/live", " ", "Title"))
            .await
            .unwrap_err();
        assert!(matches!(err, SupervisorError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_overlay_asset_removed_on_stop() {
        let fx = Fixture::new();
        let logo = fx.dir.path().join("logo.png");
        std::fs::write(&logo, b"png").unwrap();

        let request = fx.request("src.m3u8").with_overlay(OverlaySpec {
            image: Some(logo.to_string_lossy().to_string()),
            text: Some("Live: now, [really]".to_string()),
        });
        let id = fx.supervisor.start(request).await.unwrap();

        let overlay = StreamArtifacts::overlay_path(fx.work_dir(), &id, "logo.png");
        assert!(overlay.exists());

        assert!(fx.supervisor.stop(&id).await);
        assert!(!overlay.exists());
    }

    #[tokio::test]
    async fn test_unexpected_exit_is_restarted_in_place() {
        let fx = Fixture::new();
        let mut events = fx.supervisor.subscribe();
        let id = fx.supervisor.start(fx.request("src.m3u8")).await.unwrap();

        let before = fx.supervisor.info(&id).await.unwrap();
        let old_pid = before.pid.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let elapsed_before = fx.supervisor.elapsed(&id).unwrap();

        kill(old_pid);

        let event = wait_for(&mut events, |e| matches!(e, StreamEvent::Restarted { .. })).await;
        match event {
            StreamEvent::Restarted { id: restarted, restarts } => {
                assert_eq!(restarted, id);
                assert_eq!(restarts, 1);
            }
            _ => unreachable!(),
        }

        let after = fx.supervisor.info(&id).await.unwrap();
        assert_eq!(after.id, id);
        assert_eq!(after.started_at, before.started_at);
        assert_ne!(after.pid, Some(old_pid));
        assert_eq!(after.state, StreamState::Running);
        assert!(fx.supervisor.elapsed(&id).unwrap() > elapsed_before);

        // History from both runs is kept
        let log = std::fs::read_to_string(StreamArtifacts::new(fx.work_dir(), &id).log).unwrap();
        assert_eq!(log.matches("streaming src.m3u8").count(), 2);

        assert!(fx.supervisor.stop(&id).await);
    }

    #[tokio::test]
    async fn test_repeated_relaunch_failure_gives_up() {
        let fx = Fixture::with_restart(RestartPolicy {
            max_consecutive_failures: 2,
            backoff_initial_ms: 20,
            backoff_max_ms: 40,
        });
        let mut events = fx.supervisor.subscribe();
        let id = fx.supervisor.start(fx.request("src.m3u8")).await.unwrap();
        let pid = fx.supervisor.info(&id).await.unwrap().pid.unwrap();

        std::fs::write(fx.flag("launch_fail"), b"").unwrap();
        kill(pid);

        wait_for(&mut events, |e| matches!(e, StreamEvent::GaveUp(_))).await;
        assert_eq!(fx.supervisor.status(&id), Some(StreamState::Failed));
        // Dead but still registered until stopped
        assert!(fx.supervisor.elapsed(&id).is_some());

        assert!(fx.supervisor.stop(&id).await);
        assert!(fx.supervisor.status(&id).is_none());
        assert!(!StreamArtifacts::new(fx.work_dir(), &id).log.exists());
    }

    #[tokio::test]
    async fn test_stop_after_process_died() {
        let fx = Fixture::with_restart(RestartPolicy {
            max_consecutive_failures: 1,
            backoff_initial_ms: 20,
            backoff_max_ms: 20,
        });
        let id = fx.supervisor.start(fx.request("src.m3u8")).await.unwrap();
        let pid = fx.supervisor.info(&id).await.unwrap().pid.unwrap();

        kill(pid);
        assert!(fx.supervisor.stop(&id).await);
        assert!(fx.supervisor.elapsed(&id).is_none());
        assert!(!StreamArtifacts::new(fx.work_dir(), &id).log.exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_streams_are_independent() {
        let fx = Fixture::new();
        let (a, b) = tokio::join!(
            fx.supervisor.start(fx.request("a.m3u8")),
            fx.supervisor.start(fx.request("b.m3u8")),
        );
        let (a, b) = (a.unwrap(), b.unwrap());
        assert_ne!(a, b);
        assert_eq!(fx.supervisor.list().await.len(), 2);

        let b_pid = fx.supervisor.info(&b).await.unwrap().pid;
        assert!(fx.supervisor.stop(&a).await);

        tokio::time::sleep(Duration::from_millis(300)).await;
        let info = fx.supervisor.info(&b).await.unwrap();
        assert_eq!(info.state, StreamState::Running);
        assert_eq!(info.pid, b_pid);
        assert_eq!(info.restarts, 0);

        fx.supervisor.shutdown().await;
        assert!(fx.supervisor.list().await.is_empty());
    }

    #[tokio::test]
    async fn test_thumbnail_failure_then_recovery() {
        let fx = Fixture::new();
        std::fs::write(fx.flag("thumb_fail"), b"").unwrap();

        let mut events = fx.supervisor.subscribe();
        let id = fx.supervisor.start(fx.request("src.m3u8")).await.unwrap();

        // Several failed sampling periods
        tokio::time::sleep(Duration::from_millis(800)).await;
        assert!(fx.supervisor.thumbnail(&id).is_none());
        assert_eq!(fx.supervisor.status(&id), Some(StreamState::Running));

        std::fs::remove_file(fx.flag("thumb_fail")).unwrap();
        wait_for(&mut events, |e| matches!(e, StreamEvent::ThumbnailUpdated(_))).await;

        let thumbnail = fx.supervisor.thumbnail(&id).unwrap();
        assert_eq!(std::fs::read_to_string(&thumbnail).unwrap().trim(), "frame");

        // A later failure keeps the last good preview
        std::fs::write(fx.flag("thumb_fail"), b"").unwrap();
        tokio::time::sleep(Duration::from_millis(700)).await;
        assert!(fx.supervisor.thumbnail(&id).is_some());

        assert!(fx.supervisor.stop(&id).await);
        assert!(!thumbnail.exists());
    }

    #[tokio::test]
    async fn test_elapsed_keeps_growing() {
        let fx = Fixture::new();
        let id = fx.supervisor.start(fx.request("src.m3u8")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1_200)).await;
        let elapsed = fx.supervisor.elapsed(&id).unwrap();
        assert!(elapsed >= Duration::from_millis(1_200));
        assert!(elapsed < Duration::from_secs(5));

        assert!(fx.supervisor.stop(&id).await);
        assert!(fx.supervisor.elapsed(&id).is_none());
    }
}
