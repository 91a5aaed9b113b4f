//! Command-line surface of the binary

use clap::Parser;
use std::path::PathBuf;

use crate::stream::{OverlaySpec, StreamRequest};

/// Restream a media source to a destination and keep it alive
#[derive(Debug, Parser)]
#[command(name = "restream-supervisor", version, about)]
pub struct Args {
    /// JSON configuration file
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Overlay image (http(s) URL, file:// URL or local path)
    #[arg(long)]
    pub overlay_image: Option<String>,

    /// Overlay text drawn over the video
    #[arg(long)]
    pub overlay_text: Option<String>,

    /// Media source, e.g. an HLS playlist URL
    pub source: String,

    /// Destination endpoint, e.g. rtmp://host/live
    pub destination_url: String,

    /// Stream key appended to the destination
    pub destination_key: String,

    /// Stream title
    #[arg(required = true, num_args = 1..)]
    pub title: Vec<String>,
}

impl Args {
    pub fn request(&self) -> StreamRequest {
        StreamRequest::new(
            &self.source,
            &self.destination_url,
            &self.destination_key,
            self.title.join(" "),
        )
        .with_overlay(OverlaySpec {
            image: self.overlay_image.clone(),
            text: self.overlay_text.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_with_spaces() {
        let args = Args::try_parse_from([
            "restream-supervisor",
            "src.m3u8",
            "rtmp://host/live",
            "key123",
            "My",
            "Title",
            "--overlay-text",
            "LIVE",
        ])
        .unwrap();

        let request = args.request();
        assert_eq!(request.title, "My Title");
        assert_eq!(request.overlay.text.as_deref(), Some("LIVE"));
        assert!(request.overlay.image.is_none());
    }

    #[test]
    fn test_title_required() {
        let result = Args::try_parse_from(["restream-supervisor", "src", "rtmp://h", "key"]);
        assert!(result.is_err());
    }
}
