use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use reelcache_core::types::TranscodeProfile;
use reelcache_transcoder::{ExecutionError, TranscodeExecutor, hls};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::events::{EventSender, JobEvent};
use crate::ledger::{CacheLedger, LedgerError, NewCacheItem};
use crate::queue::{JobQueue, TranscodeJob};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Jobs processed at once for one queue.
    pub concurrency: usize,
    /// Fallback poll when no enqueue notification arrives.
    pub poll_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Fixed-size set of workers draining one profile queue.
pub struct WorkerPool {
    queue: Arc<dyn JobQueue>,
    ledger: Arc<dyn CacheLedger>,
    executor: Arc<dyn TranscodeExecutor>,
    events: EventSender,
    config: WorkerConfig,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        ledger: Arc<dyn CacheLedger>,
        executor: Arc<dyn TranscodeExecutor>,
        events: EventSender,
        config: WorkerConfig,
    ) -> Self {
        Self {
            queue,
            ledger,
            executor,
            events,
            config,
        }
    }

    /// Start the workers. They stop taking new jobs once `shutdown` fires;
    /// running transcodes are killed and left for `requeue_stalled`.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
        (0..self.config.concurrency.max(1))
            .map(|worker| {
                let pool = self.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { pool.run(worker, shutdown).await })
            })
            .collect()
    }

    async fn run(&self, worker: usize, shutdown: CancellationToken) {
        let profile = self.queue.profile();
        tracing::debug!(?profile, worker, "transcode worker started");
        while !shutdown.is_cancelled() {
            match self.queue.dequeue().await {
                Ok(Some(job)) => self.process(job, &shutdown).await,
                Ok(None) => {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = self.queue.wait_for_work() => {}
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
                Err(e) => {
                    tracing::error!(?profile, error = %e, "failed to dequeue job");
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.config.poll_interval) => {}
                    }
                }
            }
        }
        tracing::debug!(?profile, worker, "transcode worker stopped");
    }

    /// Run one claimed job to a terminal state.
    pub async fn process(&self, job: TranscodeJob, shutdown: &CancellationToken) {
        tracing::info!(job_id = %job.id, profile = ?job.profile, input = %job.input_path, "transcode started");

        let result = self.execute(&job, shutdown).await;
        match result {
            Ok(()) => self.finish(&job).await,
            Err(ExecutionError::Cancelled) => {
                tracing::info!(job_id = %job.id, "transcode interrupted by shutdown");
            }
            Err(e) => self.mark_failed(&job, &e.to_string()).await,
        }
    }

    /// Execute while forwarding progress changes to the queue and event bus.
    async fn execute(
        &self,
        job: &TranscodeJob,
        shutdown: &CancellationToken,
    ) -> Result<(), ExecutionError> {
        let (tx, mut rx) = watch::channel(0u8);

        let run = async {
            let sink = move |p: u8| {
                let _ = tx.send(p);
            };
            self.executor
                .execute(
                    job.profile,
                    Path::new(&job.input_path),
                    Path::new(&job.output_path),
                    &sink,
                    shutdown,
                )
                .await
        };

        let writer = async {
            while rx.changed().await.is_ok() {
                let progress = *rx.borrow_and_update();
                match self.queue.update_progress(&job.id, progress).await {
                    Ok(true) => {
                        let _ = self.events.send(JobEvent::JobProgress {
                            job_id: job.id.clone(),
                            user_id: job.user_id.clone(),
                            profile: job.profile,
                            progress,
                        });
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(job_id = %job.id, error = %e, "failed to record progress")
                    }
                }
            }
        };

        let (result, ()) = tokio::join!(run, writer);
        result
    }

    async fn finish(&self, job: &TranscodeJob) {
        let output = Path::new(&job.output_path);
        let bytes = match artifact_bytes(job.profile, output).await {
            Ok(b) => b,
            Err(e) => {
                let reason = format!("output missing after transcode: {e}");
                self.mark_failed(job, &reason).await;
                return;
            }
        };

        let recorded = self
            .ledger
            .record_completion(NewCacheItem {
                input_path: job.input_path.clone(),
                output_path: job.output_path.clone(),
                bytes,
                profile: job.profile,
                user_id: job.user_id.clone(),
                library_id: job.library_id.clone(),
                movie_id: job.movie_id.clone(),
            })
            .await;
        match recorded {
            Ok(item) => {
                tracing::debug!(job_id = %job.id, item_id = %item.id, bytes, "cache item recorded")
            }
            Err(LedgerError::Duplicate(_)) => match self.ledger.find_by_input(&job.input_path).await {
                Ok(Some(_)) => {
                    tracing::warn!(job_id = %job.id, "cache item already recorded for this input");
                }
                // Another input already owns this output path.
                Ok(None) => {
                    let reason = format!("output {} belongs to another cache item", job.output_path);
                    self.mark_failed(job, &reason).await;
                    return;
                }
                Err(e) => {
                    self.mark_failed(job, &format!("failed to record cache item: {e}"))
                        .await;
                    return;
                }
            },
            Err(e) => {
                self.mark_failed(job, &format!("failed to record cache item: {e}"))
                    .await;
                return;
            }
        }

        match self.queue.complete(&job.id).await {
            Ok(true) => {
                tracing::info!(job_id = %job.id, bytes, "transcode completed");
                let _ = self.events.send(JobEvent::JobCompleted {
                    job_id: job.id.clone(),
                    user_id: job.user_id.clone(),
                    profile: job.profile,
                    output_path: job.output_path.clone(),
                });
            }
            Ok(false) => tracing::warn!(job_id = %job.id, "job left active state before completion"),
            Err(e) => tracing::error!(job_id = %job.id, error = %e, "failed to mark job completed"),
        }
    }

    async fn mark_failed(&self, job: &TranscodeJob, reason: &str) {
        tracing::warn!(job_id = %job.id, reason, "transcode failed");
        match self.queue.fail(&job.id, reason).await {
            Ok(_) => {
                let _ = self.events.send(JobEvent::JobFailed {
                    job_id: job.id.clone(),
                    user_id: job.user_id.clone(),
                    profile: job.profile,
                    reason: reason.to_string(),
                });
            }
            Err(e) => tracing::error!(job_id = %job.id, error = %e, "failed to mark job failed"),
        }
    }
}

/// Size on disk of a finished output: the file for remux, the playlist plus
/// its segments for HLS.
pub async fn artifact_bytes(profile: TranscodeProfile, output: &Path) -> std::io::Result<u64> {
    match profile {
        TranscodeProfile::Remux => Ok(tokio::fs::metadata(output).await?.len()),
        TranscodeProfile::Hls => {
            tokio::fs::metadata(output).await?;
            let stem = output.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
            let dir = output.parent().unwrap_or_else(|| Path::new("."));
            let mut total = 0;
            let mut entries = tokio::fs::read_dir(dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name();
                if !hls::belongs_to(&stem, &name.to_string_lossy()) {
                    continue;
                }
                let meta = entry.metadata().await?;
                if meta.is_file() {
                    total += meta.len();
                }
            }
            Ok(total)
        }
    }
}
