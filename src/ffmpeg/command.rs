//! ffmpeg argument builders
//!
//! Pure functions turning stream parameters into the exact argument list
//! handed to ffmpeg. No I/O happens here; overlay images must already be
//! fetched to a local path.

use super::escape::filter_value;
use crate::config::types::{default_preset, default_video_codec};
use crate::config::{EncodingMode, SupervisorConfig};
use std::path::{Path, PathBuf};

/// Margin between overlays and the frame edge, in pixels
const OVERLAY_MARGIN: u32 = 10;

/// A fully built ffmpeg invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegCommand {
    pub program: String,
    pub args: Vec<String>,
}

/// Overlays resolved to local inputs
#[derive(Debug, Clone, Default)]
pub struct OverlayInputs {
    /// Local copy of the overlay image
    pub image: Option<PathBuf>,
    /// Raw caller text, escaped when the filter graph is built
    pub text: Option<String>,
}

impl OverlayInputs {
    pub fn is_empty(&self) -> bool {
        self.image.is_none() && self.text.is_none()
    }
}

/// Join a destination URL and stream key with exactly one slash
pub fn join_destination(url: &str, key: &str) -> String {
    format!("{}/{}", url.trim_end_matches('/'), key.trim_start_matches('/'))
}

/// Output container for a destination, chosen by its protocol
pub fn container_for(destination: &str) -> &'static str {
    let scheme = destination
        .split_once("://")
        .map(|(scheme, _)| scheme.to_ascii_lowercase())
        .unwrap_or_default();
    match scheme.as_str() {
        "srt" | "udp" | "tcp" => "mpegts",
        "rtsp" | "rtsps" => "rtsp",
        _ => "flv",
    }
}

/// Build the filter graph for the requested overlays
///
/// Image overlay comes first, text overlay second; the final pad is `[vout]`.
fn build_overlay_filter(overlay: &OverlayInputs, font_file: Option<&Path>) -> Option<String> {
    if overlay.is_empty() {
        return None;
    }

    let mut filters = Vec::new();
    let mut label = "0:v".to_string();

    if overlay.image.is_some() {
        let next = if overlay.text.is_some() { "vimg" } else { "vout" };
        filters.push(format!(
            "[{}][1:v]overlay=W-w-{}:{}[{}]",
            label, OVERLAY_MARGIN, OVERLAY_MARGIN, next
        ));
        label = next.to_string();
    }

    if let Some(text) = &overlay.text {
        let mut options = vec![format!("text={}", filter_value(text)), "expansion=none".to_string()];
        if let Some(font) = font_file {
            options.push(format!("fontfile={}", filter_value(&font.to_string_lossy())));
        }
        options.extend([
            "fontcolor=white".to_string(),
            "fontsize=28".to_string(),
            "box=1".to_string(),
            "boxcolor=black@0.5".to_string(),
            format!("x={}", OVERLAY_MARGIN),
            format!("y=h-th-{}", OVERLAY_MARGIN),
        ]);
        filters.push(format!("[{}]drawtext={}[vout]", label, options.join(":")));
    }

    Some(filters.join(";"))
}

/// Build the long-running restream invocation
pub fn build_stream_command(
    config: &SupervisorConfig,
    source: &str,
    destination: &str,
    overlay: &OverlayInputs,
) -> FfmpegCommand {
    let mut args = vec![
        "-nostdin".to_string(),
        "-loglevel".to_string(),
        config.log_level.clone(),
        // Sources are frequently transient
        "-reconnect".to_string(),
        "1".to_string(),
        "-reconnect_streamed".to_string(),
        "1".to_string(),
        "-reconnect_on_network_error".to_string(),
        "1".to_string(),
        "-reconnect_delay_max".to_string(),
        config.reconnect_delay_max_secs.to_string(),
        "-re".to_string(),
        "-i".to_string(),
        source.to_string(),
    ];

    if let Some(image) = &overlay.image {
        args.extend(["-i".to_string(), image.to_string_lossy().to_string()]);
    }

    let filter = build_overlay_filter(overlay, config.font_file.as_deref());
    if let Some(filter) = &filter {
        args.extend([
            "-filter_complex".to_string(),
            filter.clone(),
            "-map".to_string(),
            "[vout]".to_string(),
            "-map".to_string(),
            "0:a?".to_string(),
        ]);
    }

    match &config.encoding {
        EncodingMode::Transcode {
            video_codec,
            preset,
            audio_codec,
        } => {
            args.extend([
                "-c:v".to_string(),
                video_codec.clone(),
                "-preset".to_string(),
                preset.clone(),
                "-c:a".to_string(),
                audio_codec.clone(),
            ]);
        }
        EncodingMode::Copy if filter.is_some() => {
            // Filtered video cannot be stream-copied
            tracing::debug!("Overlay requested in copy mode, re-encoding video only");
            args.extend([
                "-c:v".to_string(),
                default_video_codec(),
                "-preset".to_string(),
                default_preset(),
                "-c:a".to_string(),
                "copy".to_string(),
            ]);
        }
        EncodingMode::Copy => {
            args.extend(["-c".to_string(), "copy".to_string()]);
        }
    }

    args.extend([
        "-f".to_string(),
        container_for(destination).to_string(),
        destination.to_string(),
    ]);

    FfmpegCommand {
        program: config.ffmpeg_path.clone(),
        args,
    }
}

/// Build a single-frame capture from the live source into `output`
pub fn build_thumbnail_command(config: &SupervisorConfig, source: &str, output: &Path) -> FfmpegCommand {
    FfmpegCommand {
        program: config.ffmpeg_path.clone(),
        args: vec![
            "-nostdin".to_string(),
            "-loglevel".to_string(),
            "error".to_string(),
            "-y".to_string(),
            "-i".to_string(),
            source.to_string(),
            "-frames:v".to_string(),
            "1".to_string(),
            "-q:v".to_string(),
            "2".to_string(),
            output.to_string_lossy().to_string(),
        ],
    }
}
