use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use crate::ffprobe::{MediaDescriptor, MediaProber, ProbeError};

struct Entry {
    mtime: Option<SystemTime>,
    stored: Instant,
    descriptor: MediaDescriptor,
}

/// Memoizes probe results for a short time. A changed mtime invalidates the
/// entry.
pub struct CachedProber {
    inner: Arc<dyn MediaProber>,
    ttl: Duration,
    entries: Mutex<HashMap<PathBuf, Entry>>,
}

impl CachedProber {
    pub fn new(inner: Arc<dyn MediaProber>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lookup(&self, file: &Path, mtime: Option<SystemTime>) -> Option<MediaDescriptor> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries
            .get(file)
            .filter(|e| e.mtime == mtime && e.stored.elapsed() < self.ttl)
            .map(|e| e.descriptor.clone())
    }
}

#[async_trait::async_trait]
impl MediaProber for CachedProber {
    async fn probe(&self, file: &Path) -> Result<MediaDescriptor, ProbeError> {
        let mtime = tokio::fs::metadata(file)
            .await
            .ok()
            .and_then(|m| m.modified().ok());

        if let Some(hit) = self.lookup(file, mtime) {
            return Ok(hit);
        }

        let descriptor = self.inner.probe(file).await?;

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let ttl = self.ttl;
        entries.retain(|_, e| e.stored.elapsed() < ttl);
        entries.insert(
            file.to_path_buf(),
            Entry {
                mtime,
                stored: Instant::now(),
                descriptor: descriptor.clone(),
            },
        );
        Ok(descriptor)
    }
}
