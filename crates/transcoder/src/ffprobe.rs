use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("could not start ffprobe: {0}")]
    ProcessStartFailed(#[source] std::io::Error),
    #[error("ffprobe exited with status {code:?}: {stderr}")]
    NonZeroExit { code: Option<i32>, stderr: String },
    #[error("malformed ffprobe output: {0}")]
    MalformedOutput(String),
}

/// Structured result of probing a media file. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub format: FormatInfo,
    /// Streams in container order.
    pub streams: Vec<StreamInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatInfo {
    /// ffprobe `format_name`, e.g. `matroska,webm` or `mov,mp4,m4a,3gp,3g2,mj2`.
    pub format_name: String,
    pub duration_secs: f64,
    pub bit_rate: Option<u64>,
    pub size_bytes: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Video,
    Audio,
    Subtitle,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub index: u32,
    pub kind: StreamKind,
    pub codec: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub channels: Option<u32>,
    pub language: Option<String>,
    pub title: Option<String>,
}

impl MediaDescriptor {
    /// First video stream.
    pub fn video(&self) -> Option<&StreamInfo> {
        self.streams.iter().find(|s| s.kind == StreamKind::Video)
    }

    /// First audio stream.
    pub fn audio(&self) -> Option<&StreamInfo> {
        self.streams.iter().find(|s| s.kind == StreamKind::Audio)
    }

    pub fn subtitles(&self) -> impl Iterator<Item = &StreamInfo> {
        self.streams.iter().filter(|s| s.kind == StreamKind::Subtitle)
    }
}

/// Something that can inspect a media file.
#[async_trait::async_trait]
pub trait MediaProber: Send + Sync {
    async fn probe(&self, file: &Path) -> Result<MediaDescriptor, ProbeError>;
}

/// Prober backed by the `ffprobe` binary.
#[derive(Debug, Clone)]
pub struct FfprobeProber {
    ffprobe_path: PathBuf,
}

impl FfprobeProber {
    pub fn new(ffprobe_path: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
        }
    }
}

#[async_trait::async_trait]
impl MediaProber for FfprobeProber {
    async fn probe(&self, file: &Path) -> Result<MediaDescriptor, ProbeError> {
        let output = tokio::process::Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(file)
            .output()
            .await
            .map_err(ProbeError::ProcessStartFailed)?;

        if !output.status.success() {
            return Err(ProbeError::NonZeroExit {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        parse_probe_stdout(&output.stdout)
    }
}

/// Parse the captured stdout of `ffprobe -print_format json`.
pub fn parse_probe_stdout(stdout: &[u8]) -> Result<MediaDescriptor, ProbeError> {
    if stdout.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(ProbeError::MalformedOutput("empty output".into()));
    }
    let raw: serde_json::Value = serde_json::from_slice(stdout)
        .map_err(|e| ProbeError::MalformedOutput(format!("parse JSON: {e}")))?;
    parse_probe_output(&raw)
}

fn parse_probe_output(raw: &serde_json::Value) -> Result<MediaDescriptor, ProbeError> {
    let format = raw
        .get("format")
        .and_then(|v| v.as_object())
        .ok_or_else(|| ProbeError::MalformedOutput("missing 'format'".into()))?;
    let streams = raw
        .get("streams")
        .and_then(|v| v.as_array())
        .ok_or_else(|| ProbeError::MalformedOutput("missing 'streams'".into()))?;

    let format = FormatInfo {
        format_name: format
            .get("format_name")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string(),
        duration_secs: format.get("duration").and_then(number).unwrap_or(0.0),
        bit_rate: format.get("bit_rate").and_then(number).map(|b| b as u64),
        size_bytes: format.get("size").and_then(number).map(|b| b as u64),
    };

    let streams = streams
        .iter()
        .enumerate()
        .map(|(position, s)| {
            let kind = match s.get("codec_type").and_then(|v| v.as_str()).unwrap_or("") {
                "video" => StreamKind::Video,
                "audio" => StreamKind::Audio,
                "subtitle" => StreamKind::Subtitle,
                _ => StreamKind::Other,
            };
            let tags = s.get("tags");
            let tag = |name: &str| {
                tags.and_then(|t| t.get(name))
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string())
            };
            let uint = |name: &str| s.get(name).and_then(|v| v.as_u64()).map(|v| v as u32);

            StreamInfo {
                index: uint("index").unwrap_or(position as u32),
                kind,
                codec: s
                    .get("codec_name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown")
                    .to_string(),
                width: uint("width"),
                height: uint("height"),
                channels: uint("channels"),
                language: tag("language"),
                title: tag("title"),
            }
        })
        .collect();

    Ok(MediaDescriptor { format, streams })
}

/// ffprobe prints most numbers as strings; accept either form.
fn number(v: &serde_json::Value) -> Option<f64> {
    match v {
        serde_json::Value::String(s) => s.parse().ok(),
        other => other.as_f64(),
    }
}
