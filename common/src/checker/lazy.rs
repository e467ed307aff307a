// Lazy trigger snapshot and its periodic refresher

use crate::errors::{CheckerError, StorageError};
use crate::models::TriggerId;
use crate::storage::CheckerStore;
use crate::telemetry;
use arc_swap::ArcSwap;
use rand::Rng;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// How often the unused-trigger list is reloaded
pub const LAZY_TRIGGERS_REFRESH_PERIOD: Duration = Duration::from_secs(10);

/// Immutable snapshot of lazily checked triggers, swapped wholesale on refresh
pub struct LazyTriggers {
    snapshot: ArcSwap<HashSet<TriggerId>>,
}

impl Default for LazyTriggers {
    fn default() -> Self {
        Self::new()
    }
}

impl LazyTriggers {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(HashSet::new()),
        }
    }

    pub fn contains(&self, trigger_id: &str) -> bool {
        self.snapshot.load().contains(trigger_id)
    }

    /// Current snapshot; stays valid even if a refresh lands meanwhile
    pub fn load(&self) -> Arc<HashSet<TriggerId>> {
        self.snapshot.load_full()
    }

    /// Publish a new snapshot built from `trigger_ids`, returning its size
    pub fn replace<I>(&self, trigger_ids: I) -> usize
    where
        I: IntoIterator<Item = TriggerId>,
    {
        let next: HashSet<TriggerId> = trigger_ids.into_iter().collect();
        let len = next.len();
        self.snapshot.store(Arc::new(next));
        len
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot.load().is_empty()
    }
}

/// Random TTL in `[base, 2 * base)` for one lazy trigger admission
pub fn random_lazy_ttl(base: Duration) -> Duration {
    if base.is_zero() {
        return base;
    }
    rand::thread_rng().gen_range(base..base * 2)
}

/// Reloads the lazy trigger snapshot from the store
pub struct LazyTriggersRefresher {
    store: Arc<dyn CheckerStore>,
    lazy_triggers: Arc<LazyTriggers>,
    period: Duration,
}

impl LazyTriggersRefresher {
    pub fn new(
        store: Arc<dyn CheckerStore>,
        lazy_triggers: Arc<LazyTriggers>,
        period: Duration,
    ) -> Self {
        Self {
            store,
            lazy_triggers,
            period,
        }
    }

    /// Load unused triggers and swap them in as the new snapshot
    #[instrument(skip(self))]
    pub async fn fill(&self) -> Result<usize, StorageError> {
        let trigger_ids = self.store.get_unused_trigger_ids().await?;
        let count = self.lazy_triggers.replace(trigger_ids);
        telemetry::update_unused_triggers(count);
        debug!(unused_triggers = count, "Lazy triggers snapshot refreshed");
        Ok(count)
    }

    pub async fn run(self, token: CancellationToken) -> Result<(), CheckerError> {
        info!(
            refresh_period_seconds = self.period.as_secs(),
            "Starting lazy triggers refresher"
        );
        let mut ticker = interval_at(Instant::now() + self.period, self.period);

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("Lazy triggers refresher stopped");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.fill().await {
                        warn!(error = %e, "Failed to refresh lazy triggers");
                    }
                }
            }
        }
    }
}
