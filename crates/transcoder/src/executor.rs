use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use reelcache_core::types::TranscodeProfile;
use thiserror::Error;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::ffprobe::{MediaProber, ProbeError};
use crate::progress::{ProgressSource, StderrProgress, percent};

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("duration probe failed: {0}")]
    Probe(#[from] ProbeError),
    #[error("could not start ffmpeg: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("ffmpeg exited with status {code:?}: {diagnostics}")]
    ExternalToolFailed {
        code: Option<i32>,
        diagnostics: String,
    },
    #[error("transcode cancelled")]
    Cancelled,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Receives whole-percent progress updates from a running transcode.
pub trait ProgressSink: Send + Sync {
    fn report(&self, percent: u8);
}

impl<F> ProgressSink for F
where
    F: Fn(u8) + Send + Sync,
{
    fn report(&self, percent: u8) {
        self(percent)
    }
}

/// Runs one transcode to completion.
#[async_trait::async_trait]
pub trait TranscodeExecutor: Send + Sync {
    async fn execute(
        &self,
        profile: TranscodeProfile,
        input: &Path,
        output: &Path,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<(), ExecutionError>;
}

/// Executor that shells out to `ffmpeg`.
pub struct FfmpegExecutor {
    ffmpeg_path: PathBuf,
    prober: Arc<dyn MediaProber>,
    segment_secs: u32,
}

impl FfmpegExecutor {
    pub fn new(ffmpeg_path: impl Into<PathBuf>, prober: Arc<dyn MediaProber>, segment_secs: u32) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            prober,
            segment_secs,
        }
    }
}

#[async_trait::async_trait]
impl TranscodeExecutor for FfmpegExecutor {
    async fn execute(
        &self,
        profile: TranscodeProfile,
        input: &Path,
        output: &Path,
        progress: &dyn ProgressSink,
        cancel: &CancellationToken,
    ) -> Result<(), ExecutionError> {
        let duration = self.prober.probe(input).await?.format.duration_secs;

        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let args = build_args(profile, input, output, self.segment_secs);
        tracing::debug!(?profile, input = %input.display(), output = %output.display(), "starting ffmpeg");

        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(ExecutionError::Spawn)?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExecutionError::Io(std::io::Error::other("ffmpeg stderr not captured")))?;
        let mut source = StderrProgress::new(stderr, duration);

        let mut last = None;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    if let Err(e) = child.kill().await {
                        tracing::warn!(error = %e, "failed to kill ffmpeg");
                    }
                    return Err(ExecutionError::Cancelled);
                }
                sample = source.next_sample() => match sample {
                    Some(fraction) => {
                        let p = percent(fraction);
                        if last != Some(p) {
                            progress.report(p);
                            last = Some(p);
                        }
                    }
                    None => break,
                }
            }
        }

        let status = tokio::select! {
            _ = cancel.cancelled() => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "failed to kill ffmpeg");
                }
                return Err(ExecutionError::Cancelled);
            }
            status = child.wait() => status?,
        };

        if !status.success() {
            return Err(ExecutionError::ExternalToolFailed {
                code: status.code(),
                diagnostics: source.diagnostics(),
            });
        }

        if last != Some(100) {
            progress.report(100);
        }
        Ok(())
    }
}

/// ffmpeg arguments for a profile. HLS segments land next to the playlist and
/// share its stem.
pub fn build_args(
    profile: TranscodeProfile,
    input: &Path,
    output: &Path,
    segment_secs: u32,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-hide_banner", "-nostdin", "-y", "-i"]
        .into_iter()
        .map(OsString::from)
        .collect();
    args.push(input.as_os_str().to_owned());

    let push = |args: &mut Vec<OsString>, list: &[&str]| {
        args.extend(list.iter().map(OsString::from));
    };

    match profile {
        TranscodeProfile::Remux => {
            push(
                &mut args,
                &[
                    "-map", "0:v", "-map", "0:a?", "-c", "copy", "-sn", "-movflags", "+faststart",
                    "-f", "mp4",
                ],
            );
        }
        TranscodeProfile::Hls => {
            push(
                &mut args,
                &[
                    "-map", "0:v:0?", "-map", "0:a:0?", "-c:v", "copy", "-c:a", "aac", "-ac", "2",
                    "-ar", "48000", "-b:a", "192k", "-sn", "-f", "hls",
                ],
            );
            args.push("-hls_time".into());
            args.push(segment_secs.to_string().into());
            push(&mut args, &["-hls_playlist_type", "vod", "-hls_segment_filename"]);
            let dir = output.parent().unwrap_or_else(|| Path::new("."));
            let stem = output.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
            args.push(dir.join(crate::hls::segment_pattern(&stem)).into_os_string());
        }
    }

    args.push(output.as_os_str().to_owned());
    args
}
