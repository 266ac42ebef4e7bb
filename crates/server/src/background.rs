use std::sync::Arc;
use std::time::Duration;

use reelcache_jobs::{WorkerConfig, WorkerPool};
use reelcache_transcoder::TranscodeExecutor;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::state::AppState;

/// Start one worker pool per profile queue.
pub fn spawn_workers(
    state: &AppState,
    executor: Arc<dyn TranscodeExecutor>,
    config: &WorkerConfig,
    shutdown: &CancellationToken,
) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::new();
    for queue in state.queues.all() {
        let pool = Arc::new(WorkerPool::new(
            queue.clone(),
            state.ledger.clone(),
            executor.clone(),
            state.events.clone(),
            config.clone(),
        ));
        handles.extend(pool.spawn(shutdown.clone()));
    }
    handles
}

/// Periodically drop failed jobs older than `retention`.
pub fn spawn_failed_job_pruner(
    state: &AppState,
    retention: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let queues = state.queues.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_secs(3600));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => {}
            }
            for queue in queues.all() {
                match queue.prune_failed(retention).await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!(profile = ?queue.profile(), pruned = n, "pruned failed jobs"),
                    Err(e) => tracing::warn!(profile = ?queue.profile(), error = %e, "failed to prune jobs"),
                }
            }
        }
    })
}

/// Repair state left behind by a previous process: finish interrupted
/// evictions and put interrupted transcodes back in line.
pub async fn recover(state: &AppState) -> anyhow::Result<()> {
    let reconciled = state.evictor.reconcile().await?;
    if reconciled > 0 {
        tracing::info!(reconciled, "finished interrupted evictions");
    }
    for queue in state.queues.all() {
        let requeued = queue.requeue_stalled().await?;
        if requeued > 0 {
            tracing::info!(profile = ?queue.profile(), requeued, "requeued stalled jobs");
        }
    }
    Ok(())
}
