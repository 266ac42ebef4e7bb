use serde::Serialize;
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use reelcache_db::repo::{libraries, movies};

use crate::{parser, walk};

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("library path must be absolute: {0}")]
    RelativePath(PathBuf),
    #[error("library path is not a directory: {0}")]
    NotADirectory(PathBuf),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannedMovie {
    pub id: String,
    pub title: String,
    pub year: Option<i64>,
    pub file_path: String,
    pub size_bytes: i64,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanResult {
    pub library_id: String,
    pub added: usize,
    pub skipped: usize,
    pub movies: Vec<ScannedMovie>,
}

/// Register `root` as one of `user_id`'s libraries and record every movie
/// file found beneath it. Rescanning is safe: known files only have their
/// size refreshed and count as skipped.
pub async fn scan_library(
    pool: &SqlitePool,
    user_id: &str,
    root: &Path,
) -> Result<ScanResult, ScanError> {
    if !root.is_absolute() {
        return Err(ScanError::RelativePath(root.to_path_buf()));
    }
    let meta = match tokio::fs::metadata(root).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ScanError::NotADirectory(root.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };
    if !meta.is_dir() {
        return Err(ScanError::NotADirectory(root.to_path_buf()));
    }

    let root_str = root.to_string_lossy();
    let library = libraries::get_or_create_library(pool, user_id, &root_str).await?;
    let entries = walk::walk_media_dir(root);
    info!(
        library_id = %library.id,
        path = %root_str,
        files_found = entries.len(),
        "scan found video files"
    );

    let mut result = ScanResult {
        library_id: library.id.clone(),
        ..Default::default()
    };

    for entry in &entries {
        let rel = entry.path.strip_prefix(root).unwrap_or(&entry.path);
        let parsed = parser::parse_movie(rel);
        if parsed.title.is_empty() {
            warn!(path = %entry.path.display(), "could not derive a movie title");
            result.skipped += 1;
            continue;
        }

        let file_path = entry.path.to_string_lossy();
        let folder_path = entry
            .path
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default();

        let (row, created) = movies::upsert_movie(
            pool,
            &movies::NewMovie {
                library_id: &library.id,
                title: &parsed.title,
                year: parsed.year.map(i64::from),
                folder_path: &folder_path,
                file_path: &file_path,
                size_bytes: entry.size_bytes as i64,
            },
        )
        .await?;

        if created {
            result.added += 1;
        } else {
            result.skipped += 1;
        }
        result.movies.push(ScannedMovie {
            id: row.id,
            title: row.title,
            year: row.year,
            file_path: row.file_path,
            size_bytes: row.size_bytes,
        });
    }

    info!(
        library_id = %library.id,
        added = result.added,
        skipped = result.skipped,
        "library scan finished"
    );
    Ok(result)
}
