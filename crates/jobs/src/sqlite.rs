use std::path::Path;
use std::time::Duration;

use reelcache_core::types::{CacheItemState, JobState, TranscodeProfile};
use reelcache_db::repo::cache_items::{self, CacheItemRow};
use reelcache_db::repo::libraries;
use reelcache_db::repo::transcode_jobs::{self, JobRow, NewJob};
use sqlx::SqlitePool;
use tokio::sync::Notify;

use crate::key::JobKey;
use crate::ledger::{CacheItem, CacheLedger, LedgerError, NewCacheItem};
use crate::queue::{JobHandle, JobPayload, JobQueue, QueueError, TranscodeJob, retention_cutoff_ms};

/// Job queue stored in the `transcode_job` table, one instance per profile.
pub struct SqliteJobQueue {
    pool: SqlitePool,
    profile: TranscodeProfile,
    notify: Notify,
}

impl SqliteJobQueue {
    pub fn new(pool: SqlitePool, profile: TranscodeProfile) -> Self {
        Self {
            pool,
            profile,
            notify: Notify::new(),
        }
    }

    fn queue(&self) -> &'static str {
        self.profile.as_str()
    }
}

fn row_to_job(row: JobRow) -> Result<TranscodeJob, QueueError> {
    let profile = TranscodeProfile::parse(&row.queue)
        .ok_or_else(|| QueueError::Corrupt(format!("unknown queue '{}'", row.queue)))?;
    let state = JobState::parse(&row.state)
        .ok_or_else(|| QueueError::Corrupt(format!("unknown state '{}'", row.state)))?;
    Ok(TranscodeJob {
        id: row.id,
        profile,
        input_path: row.input_path,
        output_path: row.output_path,
        library_id: row.library_id,
        user_id: row.user_id,
        movie_id: row.movie_id,
        state,
        progress: row.progress.clamp(0, 100) as u8,
        failed_reason: row.error,
        enqueued_ms: row.enqueued_ms,
        started_ms: row.started_ms,
        finished_ms: row.finished_ms,
    })
}

#[async_trait::async_trait]
impl JobQueue for SqliteJobQueue {
    fn profile(&self) -> TranscodeProfile {
        self.profile
    }

    async fn enqueue(&self, key: &JobKey, payload: JobPayload) -> Result<JobHandle, QueueError> {
        let (row, created) = transcode_jobs::enqueue(
            &self.pool,
            &NewJob {
                queue: self.queue(),
                id: key.as_str(),
                input_path: &payload.input_path,
                output_path: &payload.output_path,
                library_id: &payload.library_id,
                user_id: &payload.user_id,
                movie_id: &payload.movie_id,
            },
        )
        .await?;
        if created {
            self.notify.notify_one();
        }
        Ok(JobHandle {
            job: row_to_job(row)?,
            created,
        })
    }

    async fn get(&self, id: &str) -> Result<Option<TranscodeJob>, QueueError> {
        transcode_jobs::get_job(&self.pool, self.queue(), id)
            .await?
            .map(row_to_job)
            .transpose()
    }

    async fn remove(&self, id: &str) -> Result<bool, QueueError> {
        Ok(transcode_jobs::delete_job(&self.pool, self.queue(), id).await?)
    }

    async fn dequeue(&self) -> Result<Option<TranscodeJob>, QueueError> {
        transcode_jobs::claim_next(&self.pool, self.queue())
            .await?
            .map(row_to_job)
            .transpose()
    }

    async fn update_progress(&self, id: &str, progress: u8) -> Result<bool, QueueError> {
        Ok(transcode_jobs::update_progress(&self.pool, self.queue(), id, i64::from(progress)).await?)
    }

    async fn complete(&self, id: &str) -> Result<bool, QueueError> {
        Ok(transcode_jobs::finish(
            &self.pool,
            self.queue(),
            id,
            JobState::Completed.as_str(),
            None,
        )
        .await?)
    }

    async fn fail(&self, id: &str, reason: &str) -> Result<bool, QueueError> {
        Ok(transcode_jobs::finish(
            &self.pool,
            self.queue(),
            id,
            JobState::Failed.as_str(),
            Some(reason),
        )
        .await?)
    }

    async fn list(&self, user_id: &str) -> Result<Vec<TranscodeJob>, QueueError> {
        transcode_jobs::list_user_jobs(&self.pool, self.queue(), user_id)
            .await?
            .into_iter()
            .map(row_to_job)
            .collect()
    }

    async fn requeue_stalled(&self) -> Result<u64, QueueError> {
        let n = transcode_jobs::requeue_active(&self.pool, self.queue()).await?;
        if n > 0 {
            self.notify.notify_one();
        }
        Ok(n)
    }

    async fn prune_failed(&self, older_than: Duration) -> Result<u64, QueueError> {
        Ok(transcode_jobs::delete_failed_before(
            &self.pool,
            self.queue(),
            retention_cutoff_ms(older_than),
        )
        .await?)
    }

    async fn wait_for_work(&self) {
        self.notify.notified().await;
    }
}

/// Cache ledger stored in the `cache_item` table.
#[derive(Clone)]
pub struct SqliteLedger {
    pool: SqlitePool,
}

impl SqliteLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_item(row: CacheItemRow) -> Result<CacheItem, LedgerError> {
    let profile = TranscodeProfile::parse(&row.profile)
        .ok_or_else(|| LedgerError::Corrupt(format!("unknown profile '{}'", row.profile)))?;
    let state = CacheItemState::parse(&row.state)
        .ok_or_else(|| LedgerError::Corrupt(format!("unknown state '{}'", row.state)))?;
    Ok(CacheItem {
        id: row.id,
        input_path: row.input_path,
        output_path: row.output_path,
        bytes: u64::try_from(row.bytes).unwrap_or(0),
        profile,
        state,
        user_id: row.user_id,
        library_id: row.library_id,
        movie_id: row.movie_id,
        created_ms: row.created_ms,
        last_accessed_ms: row.last_accessed_ms,
        access_seq: row.access_seq,
    })
}

#[async_trait::async_trait]
impl CacheLedger for SqliteLedger {
    async fn record_completion(&self, item: NewCacheItem) -> Result<CacheItem, LedgerError> {
        let result = cache_items::insert_cache_item(
            &self.pool,
            &cache_items::NewCacheItem {
                input_path: &item.input_path,
                output_path: &item.output_path,
                bytes: i64::try_from(item.bytes).unwrap_or(i64::MAX),
                profile: item.profile.as_str(),
                user_id: &item.user_id,
                library_id: &item.library_id,
                movie_id: &item.movie_id,
            },
        )
        .await;

        match result {
            Ok(row) => row_to_item(row),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(LedgerError::Duplicate(item.input_path))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn touch(
        &self,
        user_id: &str,
        library_id: &str,
        movie_id: &str,
    ) -> Result<bool, LedgerError> {
        Ok(cache_items::touch(&self.pool, user_id, library_id, movie_id).await? > 0)
    }

    async fn total_bytes(&self, library_id: &str, user_id: &str) -> Result<u64, LedgerError> {
        let total = cache_items::total_bytes(&self.pool, library_id, user_id).await?;
        Ok(u64::try_from(total).unwrap_or(0))
    }

    async fn oldest_entry(
        &self,
        library_id: &str,
        user_id: &str,
    ) -> Result<Option<CacheItem>, LedgerError> {
        cache_items::oldest(&self.pool, library_id, user_id)
            .await?
            .map(row_to_item)
            .transpose()
    }

    async fn find_by_input(&self, input_path: &str) -> Result<Option<CacheItem>, LedgerError> {
        cache_items::find_by_input(&self.pool, input_path)
            .await?
            .map(row_to_item)
            .transpose()
    }

    async fn mark_deleting(&self, id: &str) -> Result<(), LedgerError> {
        if cache_items::set_state(&self.pool, id, CacheItemState::Deleting.as_str()).await? {
            Ok(())
        } else {
            Err(LedgerError::NotFound(id.to_string()))
        }
    }

    async fn list_deleting(&self) -> Result<Vec<CacheItem>, LedgerError> {
        cache_items::list_by_state(&self.pool, CacheItemState::Deleting.as_str())
            .await?
            .into_iter()
            .map(row_to_item)
            .collect()
    }

    async fn list_in_dir(&self, dir: &Path) -> Result<Vec<CacheItem>, LedgerError> {
        let mut prefix = dir.display().to_string();
        if !prefix.ends_with('/') {
            prefix.push('/');
        }
        cache_items::list_by_output_prefix(&self.pool, &prefix)
            .await?
            .into_iter()
            .map(row_to_item)
            .collect()
    }

    async fn remove(&self, id: &str) -> Result<bool, LedgerError> {
        Ok(cache_items::delete_cache_item(&self.pool, id).await?)
    }

    async fn budget(&self, library_id: &str, user_id: &str) -> Result<Option<u64>, LedgerError> {
        let library = libraries::get_library(&self.pool, library_id).await?;
        Ok(library
            .filter(|l| l.user_id == user_id)
            .map(|l| u64::try_from(l.max_cache_bytes).unwrap_or(0)))
    }
}
