//! ffmpeg integration
//!
//! This module builds ffmpeg invocations, launches and terminates the
//! long-running restream process, and captures preview frames.

pub mod command;
pub mod escape;
pub mod launcher;
pub mod thumbnail;

pub use command::{build_stream_command, join_destination, FfmpegCommand, OverlayInputs};
pub use launcher::{launch, terminate, LogMode};
pub use thumbnail::capture_frame;
