//! Cache entry model and the single-settlement waiter channel.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use crate::crypto::KeyMaterial;
use crate::error::StagingError;

/// Lifecycle of a cache entry.
///
/// `Queued -> Fetching -> {Ready | Failed}`; only the eviction sweep moves an
/// entry to `Evicting`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryState {
    Queued,
    Fetching,
    Ready,
    Failed(StagingError),
    Evicting,
}

impl EntryState {
    /// Whether the fetch for this entry has finished (successfully or not).
    pub fn is_settled(&self) -> bool {
        matches!(self, EntryState::Ready | EntryState::Failed(_))
    }
}

/// Point-in-time view of an entry handed to callers.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub id: String,
    /// Absent for entries recovered from disk until a consumer supplies one.
    pub key: Option<KeyMaterial>,
    /// Set once the object is materialized on disk.
    pub path: Option<PathBuf>,
    pub state: EntryState,
    /// Whether the cached file holds plaintext.
    pub decrypt: bool,
    pub mimetype: Option<String>,
    pub created_at: Instant,
    pub last_access_at: Option<Instant>,
    /// A consumer is reading the backing file; eviction must skip the entry.
    pub in_use: bool,
    /// A downstream consumer confirmed onward transfer.
    pub uploaded: bool,
}

impl CacheEntry {
    pub fn is_ready(&self) -> bool {
        self.state == EntryState::Ready
    }

    pub fn error(&self) -> Option<&StagingError> {
        match &self.state {
            EntryState::Failed(err) => Some(err),
            _ => None,
        }
    }
}

pub(crate) type Outcome = Result<CacheEntry, StagingError>;

/// Index record: the entry plus bookkeeping callers never see directly.
pub(crate) struct EntrySlot {
    pub(crate) entry: CacheEntry,
    /// Number of active `with_lock` holders. Advisory, not an OS lock.
    pub(crate) in_use_count: u32,
    /// Time budget handed to the fetcher for this entry.
    pub(crate) timeout: Duration,
    settled: watch::Sender<Option<Outcome>>,
}

impl EntrySlot {
    pub(crate) fn queued(
        id: &str,
        key: Option<KeyMaterial>,
        decrypt: bool,
        mimetype: Option<String>,
        timeout: Duration,
    ) -> Self {
        let (settled, _) = watch::channel(None);
        Self {
            entry: CacheEntry {
                id: id.to_string(),
                key,
                path: None,
                state: EntryState::Queued,
                decrypt,
                mimetype,
                created_at: Instant::now(),
                last_access_at: None,
                in_use: false,
                uploaded: false,
            },
            in_use_count: 0,
            timeout,
            settled,
        }
    }

    /// An entry reconstructed from a file found on disk at startup.
    pub(crate) fn recovered(
        id: &str,
        path: PathBuf,
        decrypt: bool,
        last_access_at: Instant,
        timeout: Duration,
    ) -> Self {
        let mut slot = Self::queued(id, None, decrypt, None, timeout);
        slot.entry.path = Some(path);
        slot.entry.state = EntryState::Ready;
        slot.entry.last_access_at = Some(last_access_at);
        let snapshot = slot.snapshot();
        slot.settle(Ok(snapshot));
        slot
    }

    /// An entry that failed before any fetch was attempted.
    pub(crate) fn failed(id: &str, decrypt: bool, err: StagingError, timeout: Duration) -> Self {
        let mut slot = Self::queued(id, None, decrypt, None, timeout);
        slot.entry.state = EntryState::Failed(err.clone());
        slot.touch();
        slot.settle(Err(err));
        slot
    }

    pub(crate) fn snapshot(&self) -> CacheEntry {
        self.entry.clone()
    }

    pub(crate) fn acquire(&mut self) {
        self.in_use_count += 1;
        self.entry.in_use = true;
    }

    pub(crate) fn release(&mut self) {
        self.in_use_count = self.in_use_count.saturating_sub(1);
        self.entry.in_use = self.in_use_count > 0;
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Option<Outcome>> {
        self.settled.subscribe()
    }

    /// Deliver the outcome to every current and future waiter.
    ///
    /// Only the first call has any effect; returns whether it was that call.
    pub(crate) fn settle(&self, outcome: Outcome) -> bool {
        let mut outcome = Some(outcome);
        self.settled.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = outcome.take();
            true
        })
    }

    pub(crate) fn touch(&mut self) {
        self.entry.last_access_at = Some(Instant::now());
    }
}
