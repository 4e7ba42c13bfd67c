//! Startup scan that rebuilds the index from files left by a previous run.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime};

use super::layout::{validate_content_id, CacheLayout};
use crate::error::StagingError;

/// A cached file found on disk, without its key material.
#[derive(Debug, Clone)]
pub(crate) struct RecoveredFile {
    pub(crate) id: String,
    pub(crate) path: PathBuf,
    pub(crate) decrypt: bool,
    /// Modification time mapped onto the monotonic clock.
    pub(crate) last_access_at: Instant,
}

/// Scan the layout. Interrupted downloads in `work/` are deleted; when an id
/// has both a plaintext and a ciphertext copy, the plaintext wins and the
/// ciphertext file is removed.
pub(crate) async fn scan(layout: &CacheLayout) -> Result<Vec<RecoveredFile>, StagingError> {
    for (path, _) in list_files(&layout.work_dir()).await? {
        log::info!("Removing interrupted download {}", path.display());
        remove_best_effort(&path).await;
    }

    let mut recovered = Vec::new();
    let mut seen = HashSet::new();

    for (path, modified) in list_files(&layout.plaintext_dir()).await? {
        let Some(id) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if validate_content_id(id).is_err() || !seen.insert(id.to_string()) {
            log::warn!("Ignoring unexpected cache file {}", path.display());
            continue;
        }
        recovered.push(RecoveredFile {
            id: id.to_string(),
            path,
            decrypt: true,
            last_access_at: to_instant(modified),
        });
    }

    for (path, modified) in list_files(&layout.ciphertext_dir()).await? {
        let Some(id) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        if validate_content_id(id).is_err() {
            log::warn!("Ignoring unexpected cache file {}", path.display());
            continue;
        }
        if seen.contains(id) {
            log::debug!("Dropping ciphertext copy of {}, plaintext is cached", id);
            remove_best_effort(&path).await;
            continue;
        }
        seen.insert(id.to_string());
        recovered.push(RecoveredFile {
            id: id.to_string(),
            path,
            decrypt: false,
            last_access_at: to_instant(modified),
        });
    }

    Ok(recovered)
}

/// Regular files directly under `dir`, with their modification times.
async fn list_files(dir: &Path) -> Result<Vec<(PathBuf, SystemTime)>, StagingError> {
    let mut reader = match tokio::fs::read_dir(dir).await {
        Ok(reader) => reader,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StagingError::io(dir, &e)),
    };

    let mut files = Vec::new();
    while let Some(entry) = reader
        .next_entry()
        .await
        .map_err(|e| StagingError::io(dir, &e))?
    {
        let metadata = match entry.metadata().await {
            Ok(m) => m,
            Err(e) => {
                log::warn!("Skipping {}: {}", entry.path().display(), e);
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified().unwrap_or_else(|_| SystemTime::now());
        files.push((entry.path(), modified));
    }
    Ok(files)
}

fn to_instant(modified: SystemTime) -> Instant {
    let age = SystemTime::now()
        .duration_since(modified)
        .unwrap_or_default();
    let now = Instant::now();
    now.checked_sub(age).unwrap_or(now)
}

async fn remove_best_effort(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            log::warn!("Could not remove {}: {}", path.display(), e);
        }
    }
}
