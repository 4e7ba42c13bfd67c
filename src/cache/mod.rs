//! Disk-backed staging cache with a single-flight fetch queue.
//!
//! One `CacheManager` owns a staging root and a background worker. The worker
//! drains the FIFO one ContentId at a time, settles every waiter of that id
//! with the outcome, sweeps expired entries once the queue is empty, and then
//! sleeps until the next request or the periodic interval.
//!
//! Index mutations happen under a short synchronous lock that is never held
//! across an await; fetches and file deletions only happen on the worker, so
//! an eviction can never race a download of the same id.

pub mod entry;
pub mod eviction;
pub mod layout;
pub mod queue;
mod recovery;

pub use entry::{CacheEntry, EntryState};
pub use eviction::{EvictionPolicy, EvictionReason};
pub use layout::{validate_content_id, CacheLayout};
pub use queue::FetchQueue;

use std::collections::HashMap;
use std::future::Future;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use crate::config::StagingConfig;
use crate::crypto::{decrypt_stream, KeyMaterial};
use crate::error::StagingError;
use crate::store::{ContentFetcher, ContentSource, FetchRequest};
use entry::{EntrySlot, Outcome};

/// Per-request options.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Cache plaintext (piped through `StreamDecipher`) instead of ciphertext.
    pub decrypt: bool,
    /// Picks the plaintext file extension.
    pub mimetype: Option<String>,
    /// Fetch budget; the manager default applies when absent.
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn decrypted(mimetype: Option<&str>) -> Self {
        Self {
            decrypt: true,
            mimetype: mimetype.map(str::to_string),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Result of waiting on an entry.
#[derive(Debug, Clone)]
pub enum AwaitOutcome {
    Ready(CacheEntry),
    /// The wait budget ran out; the fetch keeps going.
    TimedOut,
}

impl AwaitOutcome {
    pub fn into_entry(self) -> Option<CacheEntry> {
        match self {
            AwaitOutcome::Ready(entry) => Some(entry),
            AwaitOutcome::TimedOut => None,
        }
    }
}

#[derive(Default)]
struct Index {
    entries: HashMap<String, EntrySlot>,
    queue: FetchQueue,
    closed: bool,
}

struct Inner<S> {
    source: S,
    layout: CacheLayout,
    policy: EvictionPolicy,
    default_timeout: Duration,
    index: Mutex<Index>,
    wake: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<S> Inner<S> {
    fn index(&self) -> MutexGuard<'_, Index> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to a staging cache. Clones share the same index and worker.
pub struct CacheManager<S: ContentSource = ContentFetcher> {
    inner: Arc<Inner<S>>,
}

impl<S: ContentSource> Clone for CacheManager<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl CacheManager<ContentFetcher> {
    /// Start a manager fetching from the configured content store.
    pub async fn start(config: &StagingConfig) -> Result<Self, StagingError> {
        let fetcher = ContentFetcher::from_config(&config.store_url, config.fetch.clone());
        Self::with_source(config, fetcher).await
    }
}

impl<S: ContentSource> CacheManager<S> {
    /// Start a manager over an arbitrary content source.
    ///
    /// Creates the layout, recovers entries left by a previous run and spawns
    /// the worker. Must be called inside a tokio runtime.
    pub async fn with_source(config: &StagingConfig, source: S) -> Result<Self, StagingError> {
        let layout = CacheLayout::new(&config.root);
        layout.ensure().await?;

        let mut index = Index::default();
        for file in recovery::scan(&layout).await? {
            let slot = EntrySlot::recovered(
                &file.id,
                file.path,
                file.decrypt,
                file.last_access_at,
                config.default_timeout,
            );
            index.entries.insert(file.id, slot);
        }
        let recovered = index.entries.len();

        let (shutdown, shutdown_rx) = watch::channel(false);
        let wake = Arc::new(Notify::new());
        let inner = Arc::new(Inner {
            source,
            layout,
            policy: config.eviction.clone(),
            default_timeout: config.default_timeout,
            index: Mutex::new(index),
            wake: Arc::clone(&wake),
            shutdown,
            worker: Mutex::new(None),
        });

        let handle = tokio::spawn(run_worker(
            Arc::downgrade(&inner),
            wake,
            shutdown_rx,
            config.worker_interval,
        ));
        *inner.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        log::info!(
            "Cache manager started at {} ({} entries recovered)",
            inner.layout.root().display(),
            recovered
        );
        Ok(Self { inner })
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.inner.layout
    }

    /// Return the entry for `id`, creating it and queueing its fetch if unknown.
    ///
    /// Idempotent: an existing entry (queued, fetching, ready or failed) is
    /// returned as is. A key supplied for an entry recovered without one is
    /// attached to it.
    pub fn request(
        &self,
        id: &str,
        key: Option<KeyMaterial>,
        opts: RequestOptions,
    ) -> Result<CacheEntry, StagingError> {
        validate_content_id(id)?;

        let mut index = self.inner.index();
        if index.closed {
            return Err(StagingError::ShuttingDown);
        }

        if let Some(slot) = index.entries.get_mut(id) {
            if slot.entry.decrypt != opts.decrypt {
                log::debug!(
                    "{} is cached with decrypt={}, ignoring request for decrypt={}",
                    id,
                    slot.entry.decrypt,
                    opts.decrypt
                );
            }
            if slot.entry.key.is_none() {
                if let Some(key) = key {
                    log::debug!("Attaching key material to recovered entry {}", id);
                    slot.entry.key = Some(key);
                }
            }
            slot.touch();
            return Ok(slot.snapshot());
        }

        if opts.decrypt && key.is_none() {
            return Err(StagingError::MissingKey(id.to_string()));
        }

        let timeout = opts.timeout.unwrap_or(self.inner.default_timeout);
        let slot = EntrySlot::queued(id, key, opts.decrypt, opts.mimetype, timeout);
        let snapshot = slot.snapshot();
        index.entries.insert(id.to_string(), slot);
        index.queue.enqueue(id);
        let pending = index.queue.len();
        drop(index);

        log::debug!("Queued fetch for {} ({} pending)", id, pending);
        self.inner.wake.notify_one();
        Ok(snapshot)
    }

    /// Wait until the entry for `id` has settled or `timeout` elapses.
    ///
    /// A timeout does not cancel the fetch; poll again with `lookup` or
    /// another `await_ready`. A failed fetch is returned as its error.
    pub async fn await_ready(
        &self,
        id: &str,
        timeout: Duration,
    ) -> Result<AwaitOutcome, StagingError> {
        let mut settled = {
            let index = self.inner.index();
            let slot = index
                .entries
                .get(id)
                .ok_or_else(|| StagingError::NotFound(id.to_string()))?;
            slot.subscribe()
        };

        let waited = tokio::time::timeout(timeout, async {
            settled
                .wait_for(Option::is_some)
                .await
                .map(|value| value.clone())
        })
        .await;

        match waited {
            Err(_) => Ok(AwaitOutcome::TimedOut),
            Ok(Err(_)) => Err(StagingError::ShuttingDown),
            Ok(Ok(None)) => Err(StagingError::ShuttingDown),
            Ok(Ok(Some(Err(e)))) => Err(e),
            Ok(Ok(Some(Ok(entry)))) => {
                // Prefer the live entry: a key may have been attached since.
                let current = self
                    .lookup(id)
                    .filter(|current| current.is_ready())
                    .unwrap_or(entry);
                Ok(AwaitOutcome::Ready(current))
            }
        }
    }

    /// `request` followed by `await_ready` with the request's budget.
    pub async fn fetch(
        &self,
        id: &str,
        key: Option<KeyMaterial>,
        opts: RequestOptions,
    ) -> Result<AwaitOutcome, StagingError> {
        let timeout = opts.timeout.unwrap_or(self.inner.default_timeout);
        let entry = self.request(id, key, opts)?;
        match entry.state {
            EntryState::Ready => Ok(AwaitOutcome::Ready(entry)),
            EntryState::Failed(e) => Err(e),
            _ => self.await_ready(id, timeout).await,
        }
    }

    /// Fail `id` without fetching it, e.g. after the key service refused access.
    ///
    /// Waiters receive `err` and the failed entry blocks refetches until it is
    /// evicted. Entries already fetching or settled are left untouched.
    pub fn reject(&self, id: &str, err: StagingError) -> Result<CacheEntry, StagingError> {
        validate_content_id(id)?;
        let mut index = self.inner.index();
        if let Some(slot) = index.entries.get_mut(id) {
            if slot.entry.state == EntryState::Queued {
                slot.entry.state = EntryState::Failed(err.clone());
                slot.touch();
                slot.settle(Err(err));
            }
            return Ok(slot.snapshot());
        }
        let slot = EntrySlot::failed(id, false, err, self.inner.default_timeout);
        let snapshot = slot.snapshot();
        index.entries.insert(id.to_string(), slot);
        Ok(snapshot)
    }

    /// Current view of `id`, without side effects.
    pub fn lookup(&self, id: &str) -> Option<CacheEntry> {
        self.inner.index().entries.get(id).map(EntrySlot::snapshot)
    }

    /// Record that the entry was transferred downstream; it now expires after
    /// the short uploaded grace period.
    pub fn mark_uploaded(&self, id: &str) -> Result<(), StagingError> {
        let mut index = self.inner.index();
        let slot = index
            .entries
            .get_mut(id)
            .ok_or_else(|| StagingError::NotFound(id.to_string()))?;
        slot.entry.uploaded = true;
        slot.touch();
        Ok(())
    }

    /// Run `f` with the entry marked in use; eviction skips it until `f` completes.
    ///
    /// The mark is advisory and reference counted: every reader of the backing
    /// file must go through here.
    pub async fn with_lock<F, Fut, T>(&self, id: &str, f: F) -> Result<T, StagingError>
    where
        F: FnOnce(CacheEntry) -> Fut,
        Fut: Future<Output = T>,
    {
        let entry = {
            let mut index = self.inner.index();
            let slot = index
                .entries
                .get_mut(id)
                .ok_or_else(|| StagingError::NotFound(id.to_string()))?;
            slot.acquire();
            slot.touch();
            slot.snapshot()
        };
        let _guard = InUseGuard {
            inner: &self.inner,
            id,
        };
        Ok(f(entry).await)
    }

    /// Stop the worker. Entries still queued fail with `ShuttingDown`; a fetch
    /// already running completes first.
    pub async fn shutdown(&self) {
        let abandoned = {
            let mut index = self.inner.index();
            if index.closed {
                return;
            }
            index.closed = true;
            let pending = index.queue.drain();
            for id in &pending {
                if let Some(slot) = index.entries.get_mut(id) {
                    slot.entry.state = EntryState::Failed(StagingError::ShuttingDown);
                    slot.settle(Err(StagingError::ShuttingDown));
                }
            }
            pending.len()
        };

        self.inner.shutdown.send_replace(true);
        let handle = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::error!("Cache worker ended abnormally: {}", e);
            }
        }
        log::info!(
            "Cache manager stopped ({} queued fetches abandoned)",
            abandoned
        );
    }

    #[cfg(test)]
    pub(crate) async fn sweep_at(&self, now: Instant) -> usize {
        self.inner.sweep(now).await
    }
}

/// Releases one `with_lock` hold when dropped, including on panic or cancellation.
struct InUseGuard<'a, S> {
    inner: &'a Inner<S>,
    id: &'a str,
}

impl<S> Drop for InUseGuard<'_, S> {
    fn drop(&mut self) {
        if let Some(slot) = self.inner.index().entries.get_mut(self.id) {
            slot.release();
            slot.touch();
        }
    }
}

impl<S: ContentSource> Inner<S> {
    /// Fetch queued ids one at a time until the queue is empty.
    async fn drain_queue(&self) {
        while let Some(request) = self.next_job() {
            let outcome = self.source.fetch(&request).await;
            self.complete(&request.id, outcome);
        }
    }

    /// Pop the next queued id and move its entry to `Fetching`.
    fn next_job(&self) -> Option<FetchRequest> {
        let mut index = self.index();
        if index.closed {
            return None;
        }
        while let Some(id) = index.queue.pop() {
            let Some(slot) = index.entries.get_mut(&id) else {
                continue;
            };
            if slot.entry.state != EntryState::Queued {
                continue;
            }
            slot.entry.state = EntryState::Fetching;
            let entry = &slot.entry;
            return Some(FetchRequest {
                destination: self
                    .layout
                    .entry_path(&id, entry.decrypt, entry.mimetype.as_deref()),
                work_path: self.layout.work_path(&id),
                key: entry.key.clone(),
                decrypt: entry.decrypt,
                timeout: slot.timeout,
                id,
            });
        }
        None
    }

    /// Record the outcome and settle every waiter of `id` with it.
    fn complete(&self, id: &str, outcome: Result<PathBuf, StagingError>) {
        let mut index = self.index();
        let Some(slot) = index.entries.get_mut(id) else {
            return;
        };
        let settled: Outcome = match outcome {
            Ok(path) => {
                slot.entry.path = Some(path);
                slot.entry.state = EntryState::Ready;
                slot.touch();
                Ok(slot.snapshot())
            }
            Err(e) => {
                slot.entry.state = EntryState::Failed(e.clone());
                slot.touch();
                Err(e)
            }
        };
        slot.settle(settled);
    }

    /// Evict every entry the policy selects at `now`. Returns the number evicted.
    async fn sweep(&self, now: Instant) -> usize {
        let victims: Vec<(String, Option<PathBuf>, EvictionReason)> = {
            let mut index = self.index();
            let Index { entries, queue, .. } = &mut *index;

            let mut victims = Vec::new();
            for (id, slot) in entries.iter_mut() {
                if let Some(reason) = self.policy.evaluate(&slot.entry, queue.contains(id), now) {
                    slot.entry.state = EntryState::Evicting;
                    victims.push((id.clone(), slot.entry.path.clone(), reason));
                }
            }
            for (id, _, _) in &victims {
                if let Some(slot) = entries.remove(id) {
                    slot.settle(Err(StagingError::Cleanup { id: id.clone() }));
                }
            }
            victims
        };

        let count = victims.len();
        for (id, path, reason) in victims {
            if let Some(path) = path {
                match tokio::fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => {
                        let err = StagingError::Cleanup { id: id.clone() };
                        log::warn!("{}: could not delete {}: {}", err, path.display(), e);
                    }
                }
            }
            log::info!("Evicted {} ({:?})", id, reason);
        }
        count
    }
}

/// Drain, sweep, sleep, repeat. Exits on shutdown or once every handle is gone.
async fn run_worker<S: ContentSource>(
    inner: Weak<Inner<S>>,
    wake: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
    interval: Duration,
) {
    log::debug!("Cache worker started (interval: {}s)", interval.as_secs());
    loop {
        {
            let Some(inner) = inner.upgrade() else {
                break;
            };
            inner.drain_queue().await;
            if *shutdown.borrow() {
                break;
            }
            let evicted = inner.sweep(Instant::now()).await;
            if evicted > 0 {
                log::debug!("Eviction sweep removed {} entries", evicted);
            }
        }

        tokio::select! {
            _ = wake.notified() => {}
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {}
        }
    }
    log::debug!("Cache worker stopped");
}

/// Stream the cached object for `id` to `writer` as plaintext.
///
/// Plaintext entries are copied; ciphertext entries are piped through
/// `StreamDecipher` using `key`, or the entry's own key when `None`. The entry
/// is held in use for the whole transfer. On `Authentication` failure, bytes
/// already written must be discarded by the caller.
pub async fn read_decrypted<S, W>(
    manager: &CacheManager<S>,
    id: &str,
    key: Option<&KeyMaterial>,
    writer: &mut W,
) -> Result<u64, StagingError>
where
    S: ContentSource,
    W: AsyncWrite + Unpin,
{
    manager
        .with_lock(id, |entry| async move {
            let path = match (&entry.state, &entry.path) {
                (EntryState::Ready, Some(path)) => path.clone(),
                (EntryState::Failed(e), _) => return Err(e.clone()),
                _ => return Err(StagingError::NotFound(id.to_string())),
            };
            let mut file = tokio::fs::File::open(&path)
                .await
                .map_err(|e| StagingError::io(&path, &e))?;

            if entry.decrypt {
                let copied = tokio::io::copy(&mut file, &mut *writer)
                    .await
                    .map_err(|e| StagingError::io(&path, &e))?;
                writer
                    .flush()
                    .await
                    .map_err(|e| StagingError::io(&path, &e))?;
                return Ok(copied);
            }

            let key = key
                .or(entry.key.as_ref())
                .ok_or_else(|| StagingError::MissingKey(id.to_string()))?;
            decrypt_stream(&mut file, &mut *writer, key)
                .await
                .map_err(|e| StagingError::from_cipher(id, e))
        })
        .await?
}
