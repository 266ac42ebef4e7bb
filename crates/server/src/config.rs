use std::path::PathBuf;
use std::time::Duration;

use reelcache_jobs::{EvictionConfig, WorkerConfig};
use reelcache_transcoder::TranscoderConfig;

/// Runtime settings, read from `REELCACHE_*` environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub db_path: String,
    pub bind_addr: String,
    pub jwt_secret: String,
    pub transcoder: TranscoderConfig,
    pub workers: WorkerConfig,
    pub eviction: EvictionConfig,
    /// Failed jobs older than this are pruned from the queues.
    pub failed_retention: Duration,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let parsed = |key: &str| -> Option<u64> {
            let raw = lookup(key)?;
            match raw.trim().parse() {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!(key, value = %raw, "ignoring unparsable setting");
                    None
                }
            }
        };

        let mut transcoder = TranscoderConfig::default();
        if let Some(path) = lookup("REELCACHE_FFMPEG") {
            transcoder.ffmpeg_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("REELCACHE_FFPROBE") {
            transcoder.ffprobe_path = PathBuf::from(path);
        }
        if let Some(secs) = parsed("REELCACHE_PROBE_TTL_SECS") {
            transcoder.probe_cache_ttl = Duration::from_secs(secs);
        }

        let mut workers = WorkerConfig::default();
        if let Some(n) = parsed("REELCACHE_WORKERS") {
            workers.concurrency = n.max(1) as usize;
        }

        let mut eviction = EvictionConfig::default();
        if let Some(n) = parsed("REELCACHE_MAX_EVICTIONS") {
            eviction.max_evictions = n as usize;
        }

        let retention_hours = parsed("REELCACHE_FAILED_RETENTION_HOURS").unwrap_or(24);

        Self {
            db_path: lookup("REELCACHE_DB").unwrap_or_else(|| "reelcache.db".to_string()),
            bind_addr: lookup("REELCACHE_BIND").unwrap_or_else(|| "0.0.0.0:8097".to_string()),
            // A random secret means tokens do not survive a restart.
            jwt_secret: lookup("REELCACHE_JWT_SECRET")
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            transcoder,
            workers,
            eviction,
            failed_retention: Duration::from_secs(retention_hours * 3600),
        }
    }
}
