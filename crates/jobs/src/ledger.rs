use std::path::Path;

use reelcache_core::types::{CacheItemState, TranscodeProfile};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("cache item already recorded for {0}")]
    Duplicate(String),
    #[error("cache item not found: {0}")]
    NotFound(String),
    #[error("corrupt cache item row: {0}")]
    Corrupt(String),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// One materialized transcode output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheItem {
    pub id: String,
    pub input_path: String,
    /// The remux file, or the playlist inside an HLS directory.
    pub output_path: String,
    pub bytes: u64,
    pub profile: TranscodeProfile,
    pub state: CacheItemState,
    pub user_id: String,
    pub library_id: String,
    pub movie_id: String,
    pub created_ms: i64,
    pub last_accessed_ms: i64,
    /// Tie breaker for equal access timestamps; larger is more recent.
    pub access_seq: i64,
}

#[derive(Debug, Clone)]
pub struct NewCacheItem {
    pub input_path: String,
    pub output_path: String,
    pub bytes: u64,
    pub profile: TranscodeProfile,
    pub user_id: String,
    pub library_id: String,
    pub movie_id: String,
}

/// Bookkeeping of cache artifacts, scoped by (library, user).
///
/// Rows in the `deleting` state are being evicted: they no longer count
/// towards `total_bytes` and are never returned by `oldest_entry`.
#[async_trait::async_trait]
pub trait CacheLedger: Send + Sync {
    /// Fails with [`LedgerError::Duplicate`] if the input or output path is
    /// already recorded.
    async fn record_completion(&self, item: NewCacheItem) -> Result<CacheItem, LedgerError>;

    /// Mark a movie's artifacts as just played. Returns false if nothing
    /// matched.
    async fn touch(&self, user_id: &str, library_id: &str, movie_id: &str)
    -> Result<bool, LedgerError>;

    async fn total_bytes(&self, library_id: &str, user_id: &str) -> Result<u64, LedgerError>;

    /// The least recently accessed ready row.
    async fn oldest_entry(
        &self,
        library_id: &str,
        user_id: &str,
    ) -> Result<Option<CacheItem>, LedgerError>;

    async fn find_by_input(&self, input_path: &str) -> Result<Option<CacheItem>, LedgerError>;

    async fn mark_deleting(&self, id: &str) -> Result<(), LedgerError>;

    async fn list_deleting(&self) -> Result<Vec<CacheItem>, LedgerError>;

    /// Every row, in any state and scope, whose output lives under `dir`.
    async fn list_in_dir(&self, dir: &Path) -> Result<Vec<CacheItem>, LedgerError>;

    async fn remove(&self, id: &str) -> Result<bool, LedgerError>;

    /// Byte budget configured for the library. `None` if the library is
    /// unknown to this user; zero means unlimited.
    async fn budget(&self, library_id: &str, user_id: &str) -> Result<Option<u64>, LedgerError>;
}
