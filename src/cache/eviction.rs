//! Time-based eviction policy, evaluated against `last_access_at`.

use std::time::{Duration, Instant};

use super::entry::{CacheEntry, EntryState};

/// Idle time after which an uploaded entry is dropped.
pub const UPLOADED_GRACE: Duration = Duration::from_secs(5 * 60);

/// Idle time after which a failed entry is dropped (and may be refetched).
pub const FAILED_GRACE: Duration = Duration::from_secs(30 * 60);

/// Idle time after which any other settled entry is dropped.
pub const IDLE_GRACE: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionPolicy {
    pub uploaded_grace: Duration,
    pub failed_grace: Duration,
    pub idle_grace: Duration,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            uploaded_grace: UPLOADED_GRACE,
            failed_grace: FAILED_GRACE,
            idle_grace: IDLE_GRACE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    Uploaded,
    Failed,
    Idle,
    /// Settled entry without any recorded access.
    Orphaned,
}

impl EvictionPolicy {
    /// Decide whether `entry` should go. `queued` is true while the id sits in
    /// the pending queue.
    pub fn evaluate(&self, entry: &CacheEntry, queued: bool, now: Instant) -> Option<EvictionReason> {
        if entry.in_use || queued || !entry.state.is_settled() {
            return None;
        }

        let Some(last_access) = entry.last_access_at else {
            return Some(EvictionReason::Orphaned);
        };
        let idle = now.saturating_duration_since(last_access);

        if entry.uploaded && idle > self.uploaded_grace {
            return Some(EvictionReason::Uploaded);
        }
        if matches!(entry.state, EntryState::Failed(_)) && idle > self.failed_grace {
            return Some(EvictionReason::Failed);
        }
        if idle > self.idle_grace {
            return Some(EvictionReason::Idle);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StagingError;

    fn entry(state: EntryState, last_access_at: Option<Instant>) -> CacheEntry {
        CacheEntry {
            id: "abc".into(),
            key: None,
            path: None,
            state,
            decrypt: false,
            mimetype: None,
            created_at: Instant::now(),
            last_access_at,
            in_use: false,
            uploaded: false,
        }
    }

    const MIN: Duration = Duration::from_secs(60);

    #[test]
    fn test_uploaded_entries_use_short_grace() {
        let policy = EvictionPolicy::default();
        let start = Instant::now();
        let mut e = entry(EntryState::Ready, Some(start));
        e.uploaded = true;
        assert_eq!(policy.evaluate(&e, false, start + 4 * MIN), None);
        assert_eq!(
            policy.evaluate(&e, false, start + 6 * MIN),
            Some(EvictionReason::Uploaded)
        );
    }

    #[test]
    fn test_failed_entries_use_long_grace() {
        let policy = EvictionPolicy::default();
        let start = Instant::now();
        let e = entry(EntryState::Failed(StagingError::ShuttingDown), Some(start));
        assert_eq!(policy.evaluate(&e, false, start + 6 * MIN), None);
        assert_eq!(
            policy.evaluate(&e, false, start + 31 * MIN),
            Some(EvictionReason::Failed)
        );
    }

    #[test]
    fn test_ready_entries_expire_when_idle() {
        let policy = EvictionPolicy::default();
        let start = Instant::now();
        let e = entry(EntryState::Ready, Some(start));
        assert_eq!(policy.evaluate(&e, false, start + 29 * MIN), None);
        assert_eq!(
            policy.evaluate(&e, false, start + 31 * MIN),
            Some(EvictionReason::Idle)
        );
    }

    #[test]
    fn test_settled_entry_without_access_is_orphaned() {
        let policy = EvictionPolicy::default();
        let e = entry(EntryState::Ready, None);
        assert_eq!(
            policy.evaluate(&e, false, Instant::now()),
            Some(EvictionReason::Orphaned)
        );
    }

    #[test]
    fn test_in_use_and_pending_entries_are_never_evicted() {
        let policy = EvictionPolicy::default();
        let start = Instant::now();
        let far = start + 24 * 60 * MIN;

        let mut locked = entry(EntryState::Ready, Some(start));
        locked.in_use = true;
        locked.uploaded = true;
        assert_eq!(policy.evaluate(&locked, false, far), None);

        let queued = entry(EntryState::Queued, None);
        assert_eq!(policy.evaluate(&queued, true, far), None);

        let fetching = entry(EntryState::Fetching, None);
        assert_eq!(policy.evaluate(&fetching, false, far), None);

        let mut evicting = entry(EntryState::Evicting, Some(start));
        evicting.uploaded = true;
        assert_eq!(policy.evaluate(&evicting, false, far), None);
    }
}
