//! In-process queue and ledger for tests and throwaway runs.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use reelcache_core::types::{CacheItemState, JobState, TranscodeProfile};
use reelcache_db::now_ms;
use tokio::sync::Notify;

use crate::key::JobKey;
use crate::ledger::{CacheItem, CacheLedger, LedgerError, NewCacheItem};
use crate::queue::{JobHandle, JobPayload, JobQueue, QueueError, TranscodeJob, retention_cutoff_ms};

/// Jobs kept in enqueue order.
pub struct MemoryJobQueue {
    profile: TranscodeProfile,
    jobs: Mutex<Vec<TranscodeJob>>,
    notify: Notify,
}

impl MemoryJobQueue {
    pub fn new(profile: TranscodeProfile) -> Self {
        Self {
            profile,
            jobs: Mutex::new(Vec::new()),
            notify: Notify::new(),
        }
    }

    fn with_jobs<T>(&self, f: impl FnOnce(&mut Vec<TranscodeJob>) -> T) -> T {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut jobs)
    }

    fn transition(&self, id: &str, f: impl FnOnce(&mut TranscodeJob)) -> bool {
        self.with_jobs(|jobs| {
            match jobs
                .iter_mut()
                .find(|j| j.id == id && j.state == JobState::Active)
            {
                Some(job) => {
                    f(job);
                    true
                }
                None => false,
            }
        })
    }
}

#[async_trait::async_trait]
impl JobQueue for MemoryJobQueue {
    fn profile(&self) -> TranscodeProfile {
        self.profile
    }

    async fn enqueue(&self, key: &JobKey, payload: JobPayload) -> Result<JobHandle, QueueError> {
        let handle = self.with_jobs(|jobs| {
            if let Some(pos) = jobs.iter().position(|j| j.id == key.as_str()) {
                if jobs[pos].state != JobState::Failed {
                    return JobHandle {
                        job: jobs[pos].clone(),
                        created: false,
                    };
                }
                jobs.remove(pos);
            }
            let job = TranscodeJob {
                id: key.as_str().to_string(),
                profile: self.profile,
                input_path: payload.input_path,
                output_path: payload.output_path,
                library_id: payload.library_id,
                user_id: payload.user_id,
                movie_id: payload.movie_id,
                state: JobState::Waiting,
                progress: 0,
                failed_reason: None,
                enqueued_ms: now_ms(),
                started_ms: None,
                finished_ms: None,
            };
            jobs.push(job.clone());
            JobHandle { job, created: true }
        });
        if handle.created {
            self.notify.notify_one();
        }
        Ok(handle)
    }

    async fn get(&self, id: &str) -> Result<Option<TranscodeJob>, QueueError> {
        Ok(self.with_jobs(|jobs| jobs.iter().find(|j| j.id == id).cloned()))
    }

    async fn remove(&self, id: &str) -> Result<bool, QueueError> {
        Ok(self.with_jobs(|jobs| {
            let before = jobs.len();
            jobs.retain(|j| j.id != id);
            jobs.len() != before
        }))
    }

    async fn dequeue(&self) -> Result<Option<TranscodeJob>, QueueError> {
        Ok(self.with_jobs(|jobs| -> Option<TranscodeJob> {
            let job = jobs.iter_mut().find(|j| j.state == JobState::Waiting)?;
            job.state = JobState::Active;
            job.started_ms = Some(now_ms());
            Some(job.clone())
        }))
    }

    async fn update_progress(&self, id: &str, progress: u8) -> Result<bool, QueueError> {
        Ok(self.transition(id, |job| job.progress = progress.min(100)))
    }

    async fn complete(&self, id: &str) -> Result<bool, QueueError> {
        Ok(self.transition(id, |job| {
            job.state = JobState::Completed;
            job.progress = 100;
            job.finished_ms = Some(now_ms());
        }))
    }

    async fn fail(&self, id: &str, reason: &str) -> Result<bool, QueueError> {
        Ok(self.transition(id, |job| {
            job.state = JobState::Failed;
            job.failed_reason = Some(reason.to_string());
            job.finished_ms = Some(now_ms());
        }))
    }

    async fn list(&self, user_id: &str) -> Result<Vec<TranscodeJob>, QueueError> {
        Ok(self.with_jobs(|jobs| {
            jobs.iter()
                .rev()
                .filter(|j| j.user_id == user_id)
                .cloned()
                .collect()
        }))
    }

    async fn requeue_stalled(&self) -> Result<u64, QueueError> {
        let n = self.with_jobs(|jobs| {
            let mut n = 0;
            for job in jobs.iter_mut().filter(|j| j.state == JobState::Active) {
                job.state = JobState::Waiting;
                job.progress = 0;
                job.started_ms = None;
                n += 1;
            }
            n
        });
        if n > 0 {
            self.notify.notify_one();
        }
        Ok(n)
    }

    async fn prune_failed(&self, older_than: Duration) -> Result<u64, QueueError> {
        let cutoff = retention_cutoff_ms(older_than);
        Ok(self.with_jobs(|jobs| {
            let before = jobs.len();
            jobs.retain(|j| {
                !(j.state == JobState::Failed && j.finished_ms.is_some_and(|f| f < cutoff))
            });
            (before - jobs.len()) as u64
        }))
    }

    async fn wait_for_work(&self) {
        self.notify.notified().await;
    }
}

#[derive(Default)]
struct LedgerInner {
    items: Vec<CacheItem>,
    seq: i64,
    next_id: u64,
    budgets: HashMap<(String, String), u64>,
}

/// Ledger held in memory. Budgets must be registered with
/// [`MemoryLedger::set_budget`].
#[derive(Default)]
pub struct MemoryLedger {
    inner: Mutex<LedgerInner>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_budget(&self, library_id: &str, user_id: &str, bytes: u64) {
        self.with_inner(|inner| {
            inner
                .budgets
                .insert((library_id.to_string(), user_id.to_string()), bytes);
        })
    }

    /// Every row, in insertion order.
    pub fn items(&self) -> Vec<CacheItem> {
        self.with_inner(|inner| inner.items.clone())
    }

    fn with_inner<T>(&self, f: impl FnOnce(&mut LedgerInner) -> T) -> T {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut inner)
    }
}

fn ready_in_scope<'a>(
    items: &'a [CacheItem],
    library_id: &'a str,
    user_id: &'a str,
) -> impl Iterator<Item = &'a CacheItem> {
    items.iter().filter(move |i| {
        i.state == CacheItemState::Ready && i.library_id == library_id && i.user_id == user_id
    })
}

#[async_trait::async_trait]
impl CacheLedger for MemoryLedger {
    async fn record_completion(&self, item: NewCacheItem) -> Result<CacheItem, LedgerError> {
        self.with_inner(|inner| {
            if inner
                .items
                .iter()
                .any(|i| i.input_path == item.input_path || i.output_path == item.output_path)
            {
                return Err(LedgerError::Duplicate(item.input_path));
            }
            inner.seq += 1;
            inner.next_id += 1;
            let now = now_ms();
            let row = CacheItem {
                id: format!("item-{}", inner.next_id),
                input_path: item.input_path,
                output_path: item.output_path,
                bytes: item.bytes,
                profile: item.profile,
                state: CacheItemState::Ready,
                user_id: item.user_id,
                library_id: item.library_id,
                movie_id: item.movie_id,
                created_ms: now,
                last_accessed_ms: now,
                access_seq: inner.seq,
            };
            inner.items.push(row.clone());
            Ok(row)
        })
    }

    async fn touch(
        &self,
        user_id: &str,
        library_id: &str,
        movie_id: &str,
    ) -> Result<bool, LedgerError> {
        Ok(self.with_inner(|inner| {
            let now = now_ms();
            let mut touched = false;
            for i in inner.items.iter_mut().filter(|i| {
                i.state == CacheItemState::Ready
                    && i.user_id == user_id
                    && i.library_id == library_id
                    && i.movie_id == movie_id
            }) {
                inner.seq += 1;
                i.last_accessed_ms = now;
                i.access_seq = inner.seq;
                touched = true;
            }
            touched
        }))
    }

    async fn total_bytes(&self, library_id: &str, user_id: &str) -> Result<u64, LedgerError> {
        Ok(self.with_inner(|inner| {
            ready_in_scope(&inner.items, library_id, user_id)
                .map(|i| i.bytes)
                .sum()
        }))
    }

    async fn oldest_entry(
        &self,
        library_id: &str,
        user_id: &str,
    ) -> Result<Option<CacheItem>, LedgerError> {
        Ok(self.with_inner(|inner| {
            ready_in_scope(&inner.items, library_id, user_id)
                .min_by_key(|i| (i.last_accessed_ms, i.access_seq))
                .cloned()
        }))
    }

    async fn find_by_input(&self, input_path: &str) -> Result<Option<CacheItem>, LedgerError> {
        Ok(self.with_inner(|inner| {
            inner
                .items
                .iter()
                .find(|i| i.input_path == input_path)
                .cloned()
        }))
    }

    async fn mark_deleting(&self, id: &str) -> Result<(), LedgerError> {
        self.with_inner(|inner| match inner.items.iter_mut().find(|i| i.id == id) {
            Some(item) => {
                item.state = CacheItemState::Deleting;
                Ok(())
            }
            None => Err(LedgerError::NotFound(id.to_string())),
        })
    }

    async fn list_deleting(&self) -> Result<Vec<CacheItem>, LedgerError> {
        Ok(self.with_inner(|inner| {
            inner
                .items
                .iter()
                .filter(|i| i.state == CacheItemState::Deleting)
                .cloned()
                .collect()
        }))
    }

    async fn list_in_dir(&self, dir: &Path) -> Result<Vec<CacheItem>, LedgerError> {
        Ok(self.with_inner(|inner| {
            inner
                .items
                .iter()
                .filter(|i| Path::new(&i.output_path).starts_with(dir))
                .cloned()
                .collect()
        }))
    }

    async fn remove(&self, id: &str) -> Result<bool, LedgerError> {
        Ok(self.with_inner(|inner| {
            let before = inner.items.len();
            inner.items.retain(|i| i.id != id);
            inner.items.len() != before
        }))
    }

    async fn budget(&self, library_id: &str, user_id: &str) -> Result<Option<u64>, LedgerError> {
        Ok(self.with_inner(|inner| {
            inner
                .budgets
                .get(&(library_id.to_string(), user_id.to_string()))
                .copied()
        }))
    }
}
