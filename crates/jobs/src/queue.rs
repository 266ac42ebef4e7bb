use std::sync::Arc;
use std::time::Duration;

use reelcache_core::types::{JobState, TranscodeProfile};
use serde::Serialize;
use thiserror::Error;

use crate::key::JobKey;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("job not found: {0}")]
    NotFound(String),
    #[error("corrupt job row: {0}")]
    Corrupt(String),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// What a client asked to have transcoded.
#[derive(Debug, Clone)]
pub struct JobPayload {
    pub input_path: String,
    pub output_path: String,
    pub library_id: String,
    pub user_id: String,
    pub movie_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscodeJob {
    pub id: String,
    pub profile: TranscodeProfile,
    pub input_path: String,
    pub output_path: String,
    pub library_id: String,
    pub user_id: String,
    pub movie_id: String,
    pub state: JobState,
    pub progress: u8,
    pub failed_reason: Option<String>,
    pub enqueued_ms: i64,
    pub started_ms: Option<i64>,
    pub finished_ms: Option<i64>,
}

/// Result of [`JobQueue::enqueue`].
#[derive(Debug, Clone)]
pub struct JobHandle {
    pub job: TranscodeJob,
    /// False when an existing job with the same key was returned.
    pub created: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub active: usize,
    pub waiting: usize,
    pub completed: usize,
    pub failed: usize,
}

impl QueueStats {
    pub fn tally<'a>(jobs: impl IntoIterator<Item = &'a TranscodeJob>) -> Self {
        let mut stats = Self::default();
        for job in jobs {
            match job.state {
                JobState::Active => stats.active += 1,
                JobState::Waiting => stats.waiting += 1,
                JobState::Completed => stats.completed += 1,
                JobState::Failed => stats.failed += 1,
            }
        }
        stats
    }
}

/// A durable FIFO of transcode jobs for one output profile.
///
/// Job ids are [`JobKey`]s, so at most one job per input file exists in a
/// queue. States move waiting → active → completed | failed; terminal jobs
/// stay until removed.
#[async_trait::async_trait]
pub trait JobQueue: Send + Sync {
    fn profile(&self) -> TranscodeProfile;

    /// Create a waiting job, or return the existing one. A failed job is
    /// replaced by a fresh waiting job.
    async fn enqueue(&self, key: &JobKey, payload: JobPayload) -> Result<JobHandle, QueueError>;

    async fn get(&self, id: &str) -> Result<Option<TranscodeJob>, QueueError>;

    async fn find_active_or_waiting(
        &self,
        key: &JobKey,
    ) -> Result<Option<TranscodeJob>, QueueError> {
        Ok(self
            .get(key.as_str())
            .await?
            .filter(|j| matches!(j.state, JobState::Waiting | JobState::Active)))
    }

    async fn find_completed(&self, key: &JobKey) -> Result<Option<TranscodeJob>, QueueError> {
        Ok(self
            .get(key.as_str())
            .await?
            .filter(|j| j.state == JobState::Completed))
    }

    async fn get_progress(&self, id: &str) -> Result<u8, QueueError> {
        self.get(id)
            .await?
            .map(|j| j.progress)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))
    }

    /// Drop a job regardless of state. Returns false if there was none.
    async fn remove(&self, id: &str) -> Result<bool, QueueError>;

    /// Claim the oldest waiting job, moving it to active.
    async fn dequeue(&self) -> Result<Option<TranscodeJob>, QueueError>;

    /// The following return false when the job is not active.
    async fn update_progress(&self, id: &str, progress: u8) -> Result<bool, QueueError>;
    async fn complete(&self, id: &str) -> Result<bool, QueueError>;
    async fn fail(&self, id: &str, reason: &str) -> Result<bool, QueueError>;

    /// Jobs requested by a user, newest first.
    async fn list(&self, user_id: &str) -> Result<Vec<TranscodeJob>, QueueError>;

    /// Return jobs left active by a previous process to waiting.
    async fn requeue_stalled(&self) -> Result<u64, QueueError>;

    /// Delete failed jobs that finished more than `older_than` ago.
    async fn prune_failed(&self, older_than: Duration) -> Result<u64, QueueError>;

    /// Resolves after a job has been enqueued. May resolve spuriously.
    async fn wait_for_work(&self);
}

/// One queue per transcode profile.
#[derive(Clone)]
pub struct TranscodeQueues {
    pub remux: Arc<dyn JobQueue>,
    pub hls: Arc<dyn JobQueue>,
}

impl TranscodeQueues {
    pub fn for_profile(&self, profile: TranscodeProfile) -> &Arc<dyn JobQueue> {
        match profile {
            TranscodeProfile::Remux => &self.remux,
            TranscodeProfile::Hls => &self.hls,
        }
    }

    pub fn all(&self) -> [&Arc<dyn JobQueue>; 2] {
        [&self.remux, &self.hls]
    }
}

pub(crate) fn retention_cutoff_ms(older_than: Duration) -> i64 {
    reelcache_db::now_ms().saturating_sub(i64::try_from(older_than.as_millis()).unwrap_or(i64::MAX))
}
