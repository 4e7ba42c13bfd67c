//! Runtime configuration for the staging cache and its content fetcher.
//!
//! Environment variables (a `.env` file is honored by the binary):
//! - `MEDIA_STAGING_ROOT`: cache root directory
//! - `MEDIA_STORE_URL`: content store base URL
//! - `MEDIA_FETCH_TIMEOUT_SECS`: default per-fetch time budget

use std::path::PathBuf;
use std::time::Duration;

use crate::cache::EvictionPolicy;

pub const ENV_ROOT: &str = "MEDIA_STAGING_ROOT";
pub const ENV_STORE_URL: &str = "MEDIA_STORE_URL";
pub const ENV_FETCH_TIMEOUT: &str = "MEDIA_FETCH_TIMEOUT_SECS";

/// Pause between retries while the store still answers "not found".
pub const RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// No new retry is started with less than this much budget left.
pub const RETRY_GUARD: Duration = Duration::from_secs(1);

/// Interval of the background worker's periodic pass.
pub const WORKER_INTERVAL: Duration = Duration::from_secs(90);

/// Time budget for a fetch when the caller does not give one.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(120);

const DEFAULT_STORE_URL: &str = "http://localhost:3000";

#[derive(Debug, Clone)]
pub struct FetcherConfig {
    pub retry_backoff: Duration,
    pub retry_guard: Duration,
    pub connect_timeout: Duration,
    /// Longest silence tolerated on an open response. Transfers that keep
    /// delivering bytes are never cut off.
    pub read_timeout: Duration,
    /// Accept self-signed certificates (local store deployments only).
    pub accept_invalid_certs: bool,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            retry_backoff: RETRY_BACKOFF,
            retry_guard: RETRY_GUARD,
            connect_timeout: Duration::from_secs(10),
            read_timeout: Duration::from_secs(60),
            accept_invalid_certs: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StagingConfig {
    pub root: PathBuf,
    pub store_url: String,
    pub fetch: FetcherConfig,
    pub eviction: EvictionPolicy,
    pub worker_interval: Duration,
    pub default_timeout: Duration,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            store_url: DEFAULT_STORE_URL.to_string(),
            fetch: FetcherConfig::default(),
            eviction: EvictionPolicy::default(),
            worker_interval: WORKER_INTERVAL,
            default_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

impl StagingConfig {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(root) = lookup(ENV_ROOT).filter(|v| !v.trim().is_empty()) {
            config.root = PathBuf::from(root);
        }
        if let Some(url) = lookup(ENV_STORE_URL).filter(|v| !v.trim().is_empty()) {
            config.store_url = url.trim_end_matches('/').to_string();
        }
        if let Some(raw) = lookup(ENV_FETCH_TIMEOUT) {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => config.default_timeout = Duration::from_secs(secs),
                _ => log::warn!(
                    "Ignoring invalid {}={:?}, using {}s",
                    ENV_FETCH_TIMEOUT,
                    raw,
                    config.default_timeout.as_secs()
                ),
            }
        }

        config
    }

    /// Configuration rooted at `root`, everything else default.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }
}

fn default_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("media-staging")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = StagingConfig::from_lookup(|_| None);
        assert!(config.root.ends_with("media-staging"));
        assert_eq!(config.fetch.retry_backoff, Duration::from_secs(5));
        assert_eq!(config.fetch.retry_guard, Duration::from_secs(1));
        assert_eq!(config.fetch.read_timeout, Duration::from_secs(60));
        assert_eq!(config.worker_interval, Duration::from_secs(90));
        assert_eq!(config.eviction.uploaded_grace, Duration::from_secs(300));
        assert_eq!(config.eviction.failed_grace, Duration::from_secs(1800));
    }

    #[test]
    fn test_env_overrides() {
        let config = StagingConfig::from_lookup(lookup_from(&[
            (ENV_ROOT, "/var/cache/media"),
            (ENV_STORE_URL, "https://store.example/"),
            (ENV_FETCH_TIMEOUT, "30"),
        ]));
        assert_eq!(config.root, PathBuf::from("/var/cache/media"));
        assert_eq!(config.store_url, "https://store.example");
        assert_eq!(config.default_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_invalid_timeout_keeps_default() {
        let config = StagingConfig::from_lookup(lookup_from(&[(ENV_FETCH_TIMEOUT, "soon")]));
        assert_eq!(config.default_timeout, DEFAULT_FETCH_TIMEOUT);

        let config = StagingConfig::from_lookup(lookup_from(&[(ENV_FETCH_TIMEOUT, "0")]));
        assert_eq!(config.default_timeout, DEFAULT_FETCH_TIMEOUT);
    }
}
