//! Overlay asset fetching
//!
//! Overlay images are copied to a stream-scoped local path before launch so
//! ffmpeg never reads a remote asset mid-stream and restarts reuse the copy.

use crate::utils::{SupervisorError, SupervisorResult};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// Source of overlay assets
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// Fetch `location` into `dest`, replacing any existing file
    async fn fetch(&self, location: &str, dest: &Path) -> SupervisorResult<()>;
}

/// Fetches `http://` and `https://` assets
pub struct HttpFetcher {
    http: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> SupervisorResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SupervisorError::Fetch(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl AssetFetcher for HttpFetcher {
    async fn fetch(&self, location: &str, dest: &Path) -> SupervisorResult<()> {
        let response = self
            .http
            .get(location)
            .send()
            .await
            .map_err(|e| SupervisorError::Fetch(format!("{}: {}", location, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SupervisorError::Fetch(format!(
                "{}: server answered {}",
                location, status
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SupervisorError::Fetch(format!("{}: {}", location, e)))?;
        if bytes.is_empty() {
            return Err(SupervisorError::Fetch(format!("{}: empty body", location)));
        }

        tokio::fs::write(dest, &bytes)
            .await
            .map_err(|e| SupervisorError::Fetch(format!("Failed to write {:?}: {}", dest, e)))?;

        tracing::debug!("Fetched overlay {} ({} bytes) to {:?}", location, bytes.len(), dest);
        Ok(())
    }
}

/// Copies assets from the local filesystem (`file://` or a plain path)
pub struct LocalFetcher;

#[async_trait]
impl AssetFetcher for LocalFetcher {
    async fn fetch(&self, location: &str, dest: &Path) -> SupervisorResult<()> {
        let source = location.strip_prefix("file://").unwrap_or(location);
        tokio::fs::copy(source, dest)
            .await
            .map_err(|e| SupervisorError::Fetch(format!("{}: {}", location, e)))?;

        tracing::debug!("Copied overlay {} to {:?}", source, dest);
        Ok(())
    }
}

/// Dispatches to the HTTP or local fetcher by scheme
pub struct OverlayFetcher {
    http: HttpFetcher,
    local: LocalFetcher,
}

impl OverlayFetcher {
    pub fn new(timeout: Duration) -> SupervisorResult<Self> {
        Ok(Self {
            http: HttpFetcher::new(timeout)?,
            local: LocalFetcher,
        })
    }
}

#[async_trait]
impl AssetFetcher for OverlayFetcher {
    async fn fetch(&self, location: &str, dest: &Path) -> SupervisorResult<()> {
        let lower = location.to_ascii_lowercase();
        let result = if lower.starts_with("http://") || lower.starts_with("https://") {
            self.http.fetch(location, dest).await
        } else if lower.contains("://") && !lower.starts_with("file://") {
            Err(SupervisorError::Fetch(format!(
                "{}: unsupported overlay scheme",
                location
            )))
        } else {
            self.local.fetch(location, dest).await
        };

        if result.is_err() {
            // Never leave a half-written asset behind
            let _ = tokio::fs::remove_file(dest).await;
        }
        result
    }
}
