use std::sync::Arc;

use anyhow::Context;
use reelcache_server::config::ServerConfig;
use reelcache_server::state::AppState;
use reelcache_transcoder::{CachedProber, FfmpegExecutor, FfprobeProber, MediaProber};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = ServerConfig::from_env();
    info!(db_path = %config.db_path, "connecting to database");

    let pool = reelcache_db::connect(&config.db_path)
        .await
        .context("failed to connect to database")?;

    reelcache_db::migrate::run(&pool)
        .await
        .context("failed to run migrations")?;
    info!("migrations complete");

    let tc = &config.transcoder;
    let prober: Arc<dyn MediaProber> = Arc::new(CachedProber::new(
        Arc::new(FfprobeProber::new(&tc.ffprobe_path)),
        tc.probe_cache_ttl,
    ));
    let executor = Arc::new(FfmpegExecutor::new(
        &tc.ffmpeg_path,
        prober.clone(),
        tc.segment_secs,
    ));

    let state = AppState::new(
        pool,
        config.jwt_secret.clone(),
        prober,
        config.eviction.clone(),
    );

    reelcache_server::background::recover(&state)
        .await
        .context("failed to recover cache state")?;

    let shutdown = state.shutdown.clone();
    let workers =
        reelcache_server::background::spawn_workers(&state, executor, &config.workers, &shutdown);
    info!(
        per_queue = config.workers.concurrency,
        total = workers.len(),
        "transcode workers started"
    );
    let pruner = reelcache_server::background::spawn_failed_job_pruner(
        &state,
        config.failed_retention,
        shutdown.clone(),
    );

    let app = reelcache_server::routes::build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .context("failed to bind")?;
    info!(addr = %config.bind_addr, "server listening");

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    for handle in workers {
        let _ = handle.await;
    }
    let _ = pruner.await;
    info!("server stopped");
    Ok(())
}
