use reelcache_core::types::TranscodeProfile;
use serde::Serialize;

/// Notifications published while jobs run and the cache changes. Each one
/// names the user it concerns; subscribers only see their own.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data")]
pub enum JobEvent {
    #[serde(rename = "job_progress")]
    JobProgress {
        job_id: String,
        user_id: String,
        profile: TranscodeProfile,
        progress: u8,
    },
    #[serde(rename = "job_completed")]
    JobCompleted {
        job_id: String,
        user_id: String,
        profile: TranscodeProfile,
        output_path: String,
    },
    #[serde(rename = "job_failed")]
    JobFailed {
        job_id: String,
        user_id: String,
        profile: TranscodeProfile,
        reason: String,
    },
    #[serde(rename = "cache_evicted")]
    CacheEvicted {
        item_id: String,
        user_id: String,
        library_id: String,
        input_path: String,
        bytes: u64,
    },
}

impl JobEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::JobProgress { .. } => "job_progress",
            Self::JobCompleted { .. } => "job_completed",
            Self::JobFailed { .. } => "job_failed",
            Self::CacheEvicted { .. } => "cache_evicted",
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            Self::JobProgress { user_id, .. }
            | Self::JobCompleted { user_id, .. }
            | Self::JobFailed { user_id, .. }
            | Self::CacheEvicted { user_id, .. } => user_id,
        }
    }
}

pub type EventSender = tokio::sync::broadcast::Sender<JobEvent>;
