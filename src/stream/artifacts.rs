//! Per-stream filesystem layout
//!
//! Every stream owns a small set of files in the work directory. They are
//! exhaust: removed on stop, and their absence is never an error.

use super::types::StreamId;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Paths owned by one stream
#[derive(Debug, Clone)]
pub struct StreamArtifacts {
    /// ffmpeg diagnostic output
    pub log: PathBuf,
    /// Last good preview image
    pub thumbnail: PathBuf,
    /// In-flight capture, renamed over `thumbnail` on success
    pub thumbnail_partial: PathBuf,
    /// Fetched overlay image, if any
    pub overlay: Option<PathBuf>,
}

impl StreamArtifacts {
    pub fn new(work_dir: &Path, id: &StreamId) -> Self {
        Self {
            log: work_dir.join(format!("{}_ffmpeg.log", id)),
            thumbnail: work_dir.join(format!("{}_thumb.jpg", id)),
            thumbnail_partial: work_dir.join(format!("{}_thumb.part.jpg", id)),
            overlay: None,
        }
    }

    /// Path for a fetched overlay image, keeping the source's extension
    pub fn overlay_path(work_dir: &Path, id: &StreamId, source: &str) -> PathBuf {
        work_dir.join(format!("{}_overlay.{}", id, overlay_extension(source)))
    }

    /// Remove every artifact, ignoring files that are already gone
    pub async fn remove_all(&self) {
        let paths = [
            Some(&self.log),
            Some(&self.thumbnail),
            Some(&self.thumbnail_partial),
            self.overlay.as_ref(),
        ];
        for path in paths.into_iter().flatten() {
            remove_if_present(path).await;
        }
    }
}

async fn remove_if_present(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => tracing::debug!("Removed {:?}", path),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove {:?}: {}", path, e),
    }
}

fn overlay_extension(source: &str) -> &'static str {
    let path = source
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    match path.rsplit_once('.').map(|(_, ext)| ext) {
        Some("jpg") | Some("jpeg") => "jpg",
        Some("gif") => "gif",
        Some("webp") => "webp",
        Some("bmp") => "bmp",
        _ => "png",
    }
}
