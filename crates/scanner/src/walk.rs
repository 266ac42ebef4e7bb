use std::path::{Path, PathBuf};
use tracing::debug;

use crate::parser;

/// Video file discovered during a library walk.
#[derive(Debug, Clone)]
pub struct MediaEntry {
    pub path: PathBuf,
    pub size_bytes: u64,
    pub mtime_ts: i64,
}

/// Walk a library root recursively and collect video files.
///
/// Hidden entries are skipped, which keeps per-movie `.cache` output
/// directories out of the results. Entries come back sorted by path.
pub fn walk_media_dir(root: &Path) -> Vec<MediaEntry> {
    let mut entries = Vec::new();
    walk_recursive(root, &mut entries);
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    entries
}

fn walk_recursive(dir: &Path, entries: &mut Vec<MediaEntry>) {
    let read_dir = match std::fs::read_dir(dir) {
        Ok(rd) => rd,
        Err(e) => {
            tracing::warn!(path = %dir.display(), error = %e, "cannot read directory");
            return;
        }
    };

    for entry in read_dir.flatten() {
        let path = entry.path();
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();

        if name.starts_with('.') || parser::should_ignore(&name) {
            debug!(path = %path.display(), "skipping ignored entry");
            continue;
        }

        if path.is_dir() {
            if name == "#recycle" || name == "lost+found" {
                continue;
            }
            walk_recursive(&path, entries);
        } else if parser::is_video_file(&name) {
            let Ok(metadata) = std::fs::metadata(&path) else {
                continue;
            };
            let mtime_ts = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);

            entries.push(MediaEntry {
                path,
                size_bytes: metadata.len(),
                mtime_ts,
            });
        }
    }
}
