use std::path::{Path, PathBuf};
use std::sync::Arc;

use reelcache_core::types::{CacheItemState, JobState, TranscodeProfile};
use reelcache_transcoder::hls;
use serde::Serialize;
use thiserror::Error;

use crate::eviction::{CACHE_DIR_NAME, EvictionError, Evictor};
use crate::key::JobKey;
use crate::ledger::{CacheLedger, LedgerError};
use crate::queue::{JobPayload, QueueError, TranscodeJob, TranscodeQueues};

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("media file not found: {0}")]
    NotFound(PathBuf),
    #[error("invalid media path: {0}")]
    InvalidPath(String),
    #[error(transparent)]
    Eviction(#[from] EvictionError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A caller asking to play one movie file through a transcode profile.
#[derive(Debug, Clone)]
pub struct PlaybackRequest {
    pub user_id: String,
    pub library_id: String,
    pub movie_id: String,
    pub input_path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Queued,
    Processing,
    Completed,
}

impl TicketStatus {
    fn of(state: JobState) -> Self {
        match state {
            JobState::Active => Self::Processing,
            JobState::Completed => Self::Completed,
            JobState::Waiting | JobState::Failed => Self::Queued,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscodeTicket {
    pub status: TicketStatus,
    pub job_id: String,
    pub output_path: String,
}

impl TranscodeTicket {
    fn from_job(job: &TranscodeJob) -> Self {
        Self {
            status: TicketStatus::of(job.state),
            job_id: job.id.clone(),
            output_path: job.output_path.clone(),
        }
    }
}

/// Where a profile's output for `input` is written.
///
/// Remux: `<movie folder>/.cache/remux/<stem>.mp4`.
/// HLS: `<movie folder>/.cache/hls/<stem>.m3u8`, segments `<stem>_NNNNN.ts`
/// beside it.
pub fn output_path(profile: TranscodeProfile, input: &Path) -> Option<PathBuf> {
    let folder = input.parent()?;
    let dir = folder.join(CACHE_DIR_NAME).join(profile.as_str());
    let stem = input.file_stem()?.to_str()?;
    match profile {
        TranscodeProfile::Remux => Some(dir.join(format!("{stem}.mp4"))),
        TranscodeProfile::Hls => Some(dir.join(hls::playlist_name(stem))),
    }
}

/// Turns playback requests into queued jobs, reusing cached output when it
/// exists and making room in the cache before new work is admitted.
pub struct Dispatcher {
    queues: TranscodeQueues,
    ledger: Arc<dyn CacheLedger>,
    evictor: Arc<Evictor>,
}

impl Dispatcher {
    pub fn new(queues: TranscodeQueues, ledger: Arc<dyn CacheLedger>, evictor: Arc<Evictor>) -> Self {
        Self {
            queues,
            ledger,
            evictor,
        }
    }

    pub fn queues(&self) -> &TranscodeQueues {
        &self.queues
    }

    pub async fn request_profile(
        &self,
        profile: TranscodeProfile,
        req: &PlaybackRequest,
    ) -> Result<TranscodeTicket, DispatchError> {
        if !req.input_path.is_absolute() {
            return Err(DispatchError::InvalidPath(req.input_path.display().to_string()));
        }
        let input = req
            .input_path
            .to_str()
            .ok_or_else(|| DispatchError::InvalidPath(req.input_path.display().to_string()))?;
        let output = output_path(profile, &req.input_path)
            .ok_or_else(|| DispatchError::InvalidPath(input.to_string()))?;

        let key = JobKey::from_path(&req.input_path);
        let queue = self.queues.for_profile(profile);

        if let Some(done) = queue.find_completed(&key).await? {
            match self.ledger.find_by_input(input).await? {
                Some(item) if item.state == CacheItemState::Ready => {
                    if tokio::fs::try_exists(&item.output_path).await.unwrap_or(false) {
                        self.ledger
                            .touch(&req.user_id, &req.library_id, &req.movie_id)
                            .await?;
                        return Ok(TranscodeTicket::from_job(&done));
                    }
                    tracing::warn!(job_id = %key, output = %item.output_path, "cached output is gone, requeueing");
                    self.ledger.remove(&item.id).await?;
                }
                // The artifact was never recorded or is being evicted; start over.
                _ => tracing::warn!(job_id = %key, "completed job without a cache entry, requeueing"),
            }
            queue.remove(key.as_str()).await?;
        }

        if let Some(pending) = queue.find_active_or_waiting(&key).await? {
            return Ok(TranscodeTicket::from_job(&pending));
        }

        let size = match tokio::fs::metadata(&req.input_path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DispatchError::NotFound(req.input_path.clone()));
            }
            Err(e) => return Err(e.into()),
        };
        self.evictor
            .ensure_space(&req.user_id, &req.library_id, size)
            .await?;

        let handle = queue
            .enqueue(
                &key,
                JobPayload {
                    input_path: input.to_string(),
                    output_path: output.display().to_string(),
                    library_id: req.library_id.clone(),
                    user_id: req.user_id.clone(),
                    movie_id: req.movie_id.clone(),
                },
            )
            .await?;
        if handle.created {
            tracing::info!(job_id = %key, ?profile, input, "transcode queued");
        }
        Ok(TranscodeTicket::from_job(&handle.job))
    }
}
