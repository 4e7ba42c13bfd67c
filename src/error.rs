//! Error taxonomy shared by the fetcher, the cache manager and job runners.
//!
//! `StagingError` is `Clone`: one fetch failure is delivered to every waiter
//! registered on the same ContentId.

use std::path::Path;

use thiserror::Error;

use crate::crypto::CipherError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StagingError {
    /// Network or status failure from the content store.
    #[error("Fetch of {id} failed (status {status:?}): {message}")]
    Fetch {
        id: String,
        status: Option<u16>,
        message: String,
    },

    /// AEAD tag mismatch while decrypting fetched content.
    #[error("Authentication failed for {id}")]
    Authentication { id: String },

    /// The key provider denied or could not resolve a key.
    #[error("Key access denied for {id}: {reason}")]
    KeyAccess { id: String, reason: String },

    /// Another worker already owns this job.
    #[error("Job for {id} is already being processed elsewhere")]
    DuplicateJob { id: String },

    /// The entry was evicted while a waiter was still registered.
    #[error("Entry {id} was evicted")]
    Cleanup { id: String },

    #[error("I/O error on {path}: {message}")]
    Io { path: String, message: String },

    #[error("Invalid content id {0:?}")]
    InvalidContentId(String),

    #[error("Unknown content id {0}")]
    NotFound(String),

    #[error("Key material required to decrypt {0}")]
    MissingKey(String),

    #[error("Cipher failure: {0}")]
    Cipher(String),

    #[error("Cache manager is shutting down")]
    ShuttingDown,
}

impl StagingError {
    pub fn io(path: &Path, err: &std::io::Error) -> Self {
        StagingError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }

    /// Translate a stream cipher failure into the failure of fetching `id`.
    pub fn from_cipher(id: &str, err: CipherError) -> Self {
        match err {
            CipherError::Authentication => StagingError::Authentication { id: id.to_string() },
            other => StagingError::Cipher(other.to_string()),
        }
    }

    /// Failures the job layer treats as benign (logged, not surfaced).
    pub fn is_benign(&self) -> bool {
        matches!(self, StagingError::DuplicateJob { .. })
    }
}
