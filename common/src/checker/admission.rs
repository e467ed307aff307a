// Admission gate: decides which trigger IDs newly enter a to-check queue

use crate::cache::DedupCache;
use crate::checker::lazy::{random_lazy_ttl, LazyTriggers};
use crate::models::{Destination, TriggerId};
use crate::storage::CheckerStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Dedup and jitter policy in front of the store's to-check queues
///
/// One gate serves both destinations, so a trigger's dedup window is shared between
/// the local and remote streams.
pub struct AdmissionGate {
    store: Arc<dyn CheckerStore>,
    trigger_cache: Arc<DedupCache>,
    lazy_triggers_cache: Arc<DedupCache>,
    lazy_triggers: Arc<LazyTriggers>,
    lazy_base_ttl: Duration,
}

impl AdmissionGate {
    pub fn new(
        store: Arc<dyn CheckerStore>,
        trigger_cache: Arc<DedupCache>,
        lazy_triggers_cache: Arc<DedupCache>,
        lazy_triggers: Arc<LazyTriggers>,
        lazy_base_ttl: Duration,
    ) -> Self {
        Self {
            store,
            trigger_cache,
            lazy_triggers_cache,
            lazy_triggers,
            lazy_base_ttl,
        }
    }

    /// Subset of `trigger_ids` that passes the dedup caches, in input order
    ///
    /// A lazy trigger still inside its randomized window is skipped without touching
    /// the primary cache.
    pub fn select(&self, trigger_ids: &[TriggerId]) -> Vec<TriggerId> {
        let lazy_triggers = self.lazy_triggers.load();
        let mut to_check = Vec::with_capacity(trigger_ids.len());

        for trigger_id in trigger_ids {
            if lazy_triggers.contains(trigger_id) {
                let ttl = random_lazy_ttl(self.lazy_base_ttl);
                if !self.lazy_triggers_cache.admit_with_ttl(trigger_id, ttl) {
                    continue;
                }
            }
            if self.trigger_cache.admit(trigger_id) {
                to_check.push(trigger_id.clone());
            }
        }

        to_check
    }

    /// Admit `trigger_ids` and push the admitted ones to `destination` in one call
    pub async fn admit(&self, trigger_ids: &[TriggerId], destination: Destination) -> Vec<TriggerId> {
        let to_check = self.select(trigger_ids);
        if to_check.is_empty() {
            return to_check;
        }

        let result = match destination {
            Destination::Local => self.store.add_local_triggers_to_check(&to_check).await,
            Destination::Remote => self.store.add_remote_triggers_to_check(&to_check).await,
        };

        match result {
            Ok(()) => debug!(
                destination = %destination,
                admitted = to_check.len(),
                requested = trigger_ids.len(),
                "Triggers added to check queue"
            ),
            Err(e) => warn!(
                destination = %destination,
                admitted = to_check.len(),
                error = %e,
                "Failed to add triggers to check queue"
            ),
        }

        to_check
    }
}
