//! On-disk layout of the staging root.
//!
//! ```text
//! <root>/work/<id>             fetch in progress
//! <root>/chiffre/<id>          cached ciphertext
//! <root>/dechiffre/<id>.<ext>  cached plaintext
//! ```

use std::path::{Path, PathBuf};

use crate::error::StagingError;
use crate::mimetype::extension_for;

pub const WORK_DIR: &str = "work";
pub const CIPHERTEXT_DIR: &str = "chiffre";
pub const PLAINTEXT_DIR: &str = "dechiffre";

#[derive(Debug, Clone)]
pub struct CacheLayout {
    root: PathBuf,
}

impl CacheLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn work_dir(&self) -> PathBuf {
        self.root.join(WORK_DIR)
    }

    pub fn ciphertext_dir(&self) -> PathBuf {
        self.root.join(CIPHERTEXT_DIR)
    }

    pub fn plaintext_dir(&self) -> PathBuf {
        self.root.join(PLAINTEXT_DIR)
    }

    pub fn work_path(&self, id: &str) -> PathBuf {
        self.work_dir().join(id)
    }

    /// Final path of the cached object for `id`.
    pub fn entry_path(&self, id: &str, decrypt: bool, mimetype: Option<&str>) -> PathBuf {
        if decrypt {
            self.plaintext_dir()
                .join(format!("{}.{}", id, extension_for(mimetype)))
        } else {
            self.ciphertext_dir().join(id)
        }
    }

    /// Create every directory of the layout.
    pub async fn ensure(&self) -> Result<(), StagingError> {
        for dir in [self.work_dir(), self.ciphertext_dir(), self.plaintext_dir()] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| StagingError::io(&dir, &e))?;
        }
        Ok(())
    }
}

/// Reject ids that could escape the cache directories.
pub fn validate_content_id(id: &str) -> Result<(), StagingError> {
    let bad = id.is_empty()
        || id.contains('/')
        || id.contains('\\')
        || id.contains("..")
        || id.contains('\0');
    if bad {
        return Err(StagingError::InvalidContentId(id.to_string()));
    }
    Ok(())
}
