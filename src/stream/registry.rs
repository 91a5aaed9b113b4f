//! Stream registry
//!
//! The authoritative map from stream id to its live handle. The map sits
//! behind a single lock that is never held across an await; the process of
//! each stream has its own async lock so the liveness monitor can replace it
//! in place without touching the map.
//!
//! An entry outlives its own teardown: `stop` claims the background tasks
//! under the lock, and removes the entry only once the tasks have ended and
//! the process is gone.

use super::artifacts::StreamArtifacts;
use super::types::{StreamId, StreamInfo, StreamRequest, StreamState};
use crate::ffmpeg::OverlayInputs;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Everything the supervisor and the two background tasks share about a stream
pub struct StreamHandle {
    pub id: StreamId,
    pub request: StreamRequest,

    /// Destination URL joined with the stream key
    pub destination: String,

    /// Overlays resolved to local inputs, reused on restart
    pub overlay: OverlayInputs,

    pub artifacts: StreamArtifacts,

    /// Process currently fulfilling this stream
    pub process: tokio::sync::Mutex<Child>,

    /// Cooperative shutdown signal for the monitor and sampler
    pub cancel: CancellationToken,

    /// Original start, never reset by a restart
    started: Instant,
    started_at: DateTime<Utc>,

    state: RwLock<StreamState>,
    restarts: AtomicU32,
}

impl StreamHandle {
    pub fn new(
        id: StreamId,
        request: StreamRequest,
        destination: String,
        overlay: OverlayInputs,
        artifacts: StreamArtifacts,
        child: Child,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            request,
            destination,
            overlay,
            artifacts,
            process: tokio::sync::Mutex::new(child),
            cancel,
            started: Instant::now(),
            started_at: Utc::now(),
            state: RwLock::new(StreamState::Running),
            restarts: AtomicU32::new(0),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn state(&self) -> StreamState {
        *self.state.read()
    }

    /// Update the state; `Stopping` is final
    pub fn set_state(&self, state: StreamState) {
        let mut current = self.state.write();
        if *current != StreamState::Stopping {
            *current = state;
        }
    }

    pub fn restarts(&self) -> u32 {
        self.restarts.load(Ordering::Relaxed)
    }

    /// Count a successful relaunch, returning the new total
    pub fn record_restart(&self) -> u32 {
        self.restarts.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Pid of the current process, if it has not been reaped
    ///
    /// `None` as well while the process is being swapped or terminated.
    pub fn pid(&self) -> Option<u32> {
        self.process.try_lock().ok().and_then(|process| process.id())
    }

    /// Snapshot for status reporting
    pub async fn info(&self) -> StreamInfo {
        let thumbnail = tokio::fs::try_exists(&self.artifacts.thumbnail)
            .await
            .unwrap_or(false)
            .then(|| self.artifacts.thumbnail.clone());

        StreamInfo {
            id: self.id.clone(),
            title: self.request.title.clone(),
            source: self.request.source.clone(),
            destination: self.destination.clone(),
            started_at: self.started_at,
            elapsed_ms: self.elapsed().as_millis() as u64,
            restarts: self.restarts(),
            state: self.state(),
            pid: self.pid(),
            thumbnail,
        }
    }
}

/// Background tasks of a stream
pub struct StreamTasks {
    pub monitor: JoinHandle<()>,
    pub sampler: JoinHandle<()>,
}

/// A registered stream; `tasks` is taken by whoever claims the teardown
pub struct StreamEntry {
    pub handle: Arc<StreamHandle>,
    tasks: Option<StreamTasks>,
}

impl StreamEntry {
    pub fn new(handle: Arc<StreamHandle>, tasks: StreamTasks) -> Self {
        Self {
            handle,
            tasks: Some(tasks),
        }
    }
}

/// Map from stream id to its entry
#[derive(Default)]
pub struct Registry {
    streams: Mutex<HashMap<StreamId, StreamEntry>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entry: StreamEntry) {
        let id = entry.handle.id.clone();
        let previous = self.streams.lock().insert(id.clone(), entry);
        debug_assert!(previous.is_none(), "duplicate stream id {}", id);
    }

    /// Claim the teardown of a stream
    ///
    /// The entry stays registered. Only the first caller gets the tasks;
    /// later callers and unknown ids get `None`.
    pub fn claim(&self, id: &StreamId) -> Option<(Arc<StreamHandle>, StreamTasks)> {
        let mut streams = self.streams.lock();
        let entry = streams.get_mut(id)?;
        let tasks = entry.tasks.take()?;
        Some((Arc::clone(&entry.handle), tasks))
    }

    pub fn remove(&self, id: &StreamId) -> Option<StreamEntry> {
        self.streams.lock().remove(id)
    }

    pub fn get(&self, id: &StreamId) -> Option<Arc<StreamHandle>> {
        self.streams.lock().get(id).map(|e| Arc::clone(&e.handle))
    }

    pub fn handles(&self) -> Vec<Arc<StreamHandle>> {
        self.streams
            .lock()
            .values()
            .map(|e| Arc::clone(&e.handle))
            .collect()
    }

    pub fn ids(&self) -> Vec<StreamId> {
        self.streams.lock().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.streams.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.lock().is_empty()
    }

    /// Signal every stream's tasks to stop without waiting
    pub fn cancel_all(&self) {
        for entry in self.streams.lock().values() {
            entry.handle.cancel.cancel();
        }
    }
}
