#![allow(clippy::collapsible_if, clippy::redundant_closure)]
pub mod decision;
pub mod executor;
pub mod ffprobe;
pub mod hls;
pub mod probe_cache;
pub mod progress;

use std::path::PathBuf;
use std::time::Duration;

pub use decision::{BrowserCaps, PlayDecision, classify};
pub use executor::{ExecutionError, FfmpegExecutor, ProgressSink, TranscodeExecutor};
pub use ffprobe::{FfprobeProber, MediaDescriptor, MediaProber, ProbeError};
pub use probe_cache::CachedProber;

/// Global transcoder configuration.
#[derive(Debug, Clone)]
pub struct TranscoderConfig {
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    /// Target HLS segment length.
    pub segment_secs: u32,
    /// How long a probe result may be reused.
    pub probe_cache_ttl: Duration,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            segment_secs: 4,
            probe_cache_ttl: Duration::from_secs(30),
        }
    }
}
