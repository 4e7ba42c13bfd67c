//! Staging of one media job: resolve the key, then fetch through the cache.

use std::time::Duration;

use crate::cache::{AwaitOutcome, CacheEntry, CacheManager, RequestOptions};
use crate::collab::{KeyContext, KeyProvider, KeyResolution};
use crate::error::StagingError;
use crate::store::ContentSource;

/// A processing job as handed over by the dispatch layer.
#[derive(Debug, Clone)]
pub struct MediaJob {
    pub id: String,
    pub mimetype: Option<String>,
    /// Transcoders need plaintext; pass-through consumers keep ciphertext.
    pub decrypt: bool,
    pub context: KeyContext,
    pub timeout: Option<Duration>,
}

impl MediaJob {
    fn options(&self) -> RequestOptions {
        RequestOptions {
            decrypt: self.decrypt,
            mimetype: self.mimetype.clone(),
            timeout: self.timeout,
        }
    }
}

#[derive(Debug, Clone)]
pub enum JobOutcome {
    /// The content is cached and can be read through `with_lock`.
    Ready(CacheEntry),
    /// Still fetching when the budget ran out; retry the job later.
    Pending,
    /// Another worker owns this job.
    Skipped,
}

/// Stage the content of `job` in `cache`.
///
/// A cached entry is served without contacting the key service. A duplicate
/// job is logged and skipped; an access refusal fails the entry with
/// `KeyAccess`, which every waiter of the id receives.
pub async fn stage_job<S, K>(
    cache: &CacheManager<S>,
    keys: &K,
    job: &MediaJob,
) -> Result<JobOutcome, StagingError>
where
    S: ContentSource,
    K: KeyProvider,
{
    if let Some(entry) = cache.lookup(&job.id) {
        if entry.is_ready() {
            log::debug!("Cache hit for {}", job.id);
            let entry = cache.request(&job.id, None, job.options())?;
            return Ok(JobOutcome::Ready(entry));
        }
    }

    let key = match resolve(keys, job).await {
        Ok(key) => key,
        Err(e) if e.is_benign() => {
            log::info!("Skipping {}: {}", job.id, e);
            return Ok(JobOutcome::Skipped);
        }
        Err(e) => {
            if matches!(e, StagingError::KeyAccess { .. }) {
                cache.reject(&job.id, e.clone())?;
            }
            log::warn!("Job for {} failed: {}", job.id, e);
            return Err(e);
        }
    };

    match cache.fetch(&job.id, Some(key), job.options()).await? {
        AwaitOutcome::Ready(entry) => Ok(JobOutcome::Ready(entry)),
        AwaitOutcome::TimedOut => {
            log::debug!("{} still fetching, job will be retried", job.id);
            Ok(JobOutcome::Pending)
        }
    }
}

async fn resolve<K: KeyProvider>(
    keys: &K,
    job: &MediaJob,
) -> Result<crate::crypto::KeyMaterial, StagingError> {
    match keys.resolve_key(&job.id, &job.context).await? {
        KeyResolution::Key(key) => Ok(key),
        KeyResolution::AccessDenied(reason) => Err(StagingError::KeyAccess {
            id: job.id.clone(),
            reason,
        }),
        KeyResolution::Duplicate => Err(StagingError::DuplicateJob { id: job.id.clone() }),
    }
}
