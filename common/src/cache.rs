// TTL-expiring dedup set shared by the metric-event consumers and the admission gate

use crate::errors::CheckerError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Concurrent insert-if-absent set whose entries expire after a TTL
///
/// Presence means "recently admitted". An expired entry counts as absent even before
/// [`DedupCache::purge_expired`] sweeps it away, so staleness is bounded by the sweep
/// interval only in terms of memory, never in terms of admission.
#[derive(Debug)]
pub struct DedupCache {
    name: &'static str,
    default_ttl: Duration,
    entries: DashMap<String, Instant>,
}

impl DedupCache {
    /// Create a new cache whose entries live for `default_ttl`
    pub fn new(name: &'static str, default_ttl: Duration) -> Self {
        Self {
            name,
            default_ttl,
            entries: DashMap::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Insert `key` with the default TTL if it is absent or expired
    ///
    /// Returns `true` when the key was admitted.
    pub fn admit(&self, key: &str) -> bool {
        self.admit_with_ttl(key, self.default_ttl)
    }

    /// Insert `key` with a caller-chosen TTL if it is absent or expired
    pub fn admit_with_ttl(&self, key: &str, ttl: Duration) -> bool {
        let now = Instant::now();
        let expires_at = now + ttl;

        // The shard lock is held across check and insert.
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if *entry.get() > now {
                    return false;
                }
                entry.insert(expires_at);
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(expires_at);
                true
            }
        }
    }

    /// Whether `key` is currently present and unexpired
    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .map(|expires_at| *expires_at > Instant::now())
            .unwrap_or(false)
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| *expires_at > now);
        before.saturating_sub(self.entries.len())
    }

    /// Number of stored entries, expired ones included until the next sweep
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Periodically sweeps expired entries out of a set of caches
pub struct CacheJanitor {
    caches: Vec<Arc<DedupCache>>,
    period: Duration,
}

impl CacheJanitor {
    pub fn new(caches: Vec<Arc<DedupCache>>, period: Duration) -> Self {
        Self { caches, period }
    }

    pub fn sweep(&self) -> usize {
        self.caches
            .iter()
            .map(|cache| {
                let purged = cache.purge_expired();
                if purged > 0 {
                    debug!(cache = cache.name(), purged, "Purged expired cache entries");
                }
                purged
            })
            .sum()
    }

    pub async fn run(self, token: CancellationToken) -> Result<(), CheckerError> {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        loop {
            tokio::select! {
                _ = token.cancelled() => return Ok(()),
                _ = ticker.tick() => {
                    self.sweep();
                }
            }
        }
    }
}
