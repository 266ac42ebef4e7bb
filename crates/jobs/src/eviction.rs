use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;

use crate::events::{EventSender, JobEvent};
use crate::key::JobKey;
use crate::ledger::{CacheItem, CacheLedger, LedgerError};
use crate::queue::{QueueError, TranscodeQueues};

/// Name of the per-movie directory holding transcode outputs.
pub const CACHE_DIR_NAME: &str = ".cache";

#[derive(Error, Debug)]
pub enum EvictionError {
    #[error("item of {needed} bytes exceeds the cache budget of {budget} bytes")]
    CapacityExceeded { needed: u64, budget: u64 },
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Queue(#[from] QueueError),
}

#[derive(Debug, Clone)]
pub struct EvictionConfig {
    /// Most items one `ensure_space` call may evict.
    pub max_evictions: usize,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self { max_evictions: 10 }
    }
}

/// Least-recently-used eviction over the cache ledger.
pub struct Evictor {
    ledger: Arc<dyn CacheLedger>,
    queues: TranscodeQueues,
    config: EvictionConfig,
    events: Option<EventSender>,
    pass: Mutex<()>,
}

impl Evictor {
    pub fn new(ledger: Arc<dyn CacheLedger>, queues: TranscodeQueues, config: EvictionConfig) -> Self {
        Self {
            ledger,
            queues,
            config,
            events: None,
            pass: Mutex::new(()),
        }
    }

    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Evict the least recently used items of a (library, user) scope until
    /// `estimated_bytes` more would fit in its budget, or the eviction ceiling
    /// is reached. Returns how many items were evicted.
    pub async fn ensure_space(
        &self,
        user_id: &str,
        library_id: &str,
        estimated_bytes: u64,
    ) -> Result<usize, EvictionError> {
        let budget = match self.ledger.budget(library_id, user_id).await? {
            Some(b) if b > 0 => b,
            _ => return Ok(0),
        };
        if estimated_bytes > budget {
            return Err(EvictionError::CapacityExceeded {
                needed: estimated_bytes,
                budget,
            });
        }

        let _pass = self.pass.lock().await;

        let mut current = self.ledger.total_bytes(library_id, user_id).await?;
        let mut evicted = 0;
        while current.saturating_add(estimated_bytes) > budget && evicted < self.config.max_evictions {
            let Some(item) = self.ledger.oldest_entry(library_id, user_id).await? else {
                tracing::error!(
                    library_id,
                    user_id,
                    current,
                    "cache total is over budget but no entry is left to evict"
                );
                break;
            };

            self.ledger.mark_deleting(&item.id).await?;
            self.evict(&item).await?;
            // Neighbours sharing the deleted directory may have gone too.
            current = self.ledger.total_bytes(library_id, user_id).await?;
            evicted += 1;
        }

        if current.saturating_add(estimated_bytes) > budget {
            tracing::warn!(
                library_id,
                user_id,
                current,
                estimated_bytes,
                budget,
                evicted,
                "cache budget still exceeded after eviction"
            );
        } else if evicted > 0 {
            tracing::info!(library_id, evicted, "evicted cache items");
        }
        Ok(evicted)
    }

    /// Finish evictions interrupted by a crash: every row still marked
    /// `deleting` loses its artifact, its job and finally the row itself.
    pub async fn reconcile(&self) -> Result<usize, EvictionError> {
        let _pass = self.pass.lock().await;
        let pending = self.ledger.list_deleting().await?;
        for item in &pending {
            tracing::info!(item_id = %item.id, input = %item.input_path, "completing interrupted eviction");
            self.evict(item).await?;
        }
        Ok(pending.len())
    }

    /// Removes the artifact, the job that produced it and the ledger row, in
    /// that order. The row must already be marked `deleting`.
    ///
    /// The whole `.cache` directory goes, so every other row whose output
    /// lived there is dropped with its job as well.
    async fn evict(&self, item: &CacheItem) -> Result<(), EvictionError> {
        let output = Path::new(&item.output_path);
        remove_artifact(output).await;
        self.forget(item).await?;

        if let Some(dir) = cache_dir_of(output) {
            for other in self.ledger.list_in_dir(dir).await? {
                if other.id == item.id {
                    continue;
                }
                tracing::info!(item_id = %other.id, input = %other.input_path, "cache item removed with its directory");
                self.forget(&other).await?;
            }
        }
        Ok(())
    }

    /// Drop the job and ledger row of an artifact that is no longer on disk.
    async fn forget(&self, item: &CacheItem) -> Result<(), EvictionError> {
        let key = JobKey::from_path(Path::new(&item.input_path));
        self.queues
            .for_profile(item.profile)
            .remove(key.as_str())
            .await?;
        self.ledger.remove(&item.id).await?;

        tracing::debug!(item_id = %item.id, bytes = item.bytes, "cache item evicted");
        if let Some(events) = &self.events {
            let _ = events.send(JobEvent::CacheEvicted {
                item_id: item.id.clone(),
                user_id: item.user_id.clone(),
                library_id: item.library_id.clone(),
                input_path: item.input_path.clone(),
                bytes: item.bytes,
            });
        }
        Ok(())
    }
}

/// The `.cache` directory two levels above an output file, if the layout
/// matches.
pub fn cache_dir_of(output: &Path) -> Option<&Path> {
    let dir = output.parent()?.parent()?;
    (dir.file_name()? == CACHE_DIR_NAME).then_some(dir)
}

/// Best effort: a missing directory is fine, other failures are logged.
async fn remove_artifact(output: &Path) {
    let Some(dir) = cache_dir_of(output) else {
        tracing::warn!(output = %output.display(), "refusing to delete outside a cache directory");
        return;
    };
    match tokio::fs::remove_dir_all(dir).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "failed to delete cache directory");
        }
    }
}
