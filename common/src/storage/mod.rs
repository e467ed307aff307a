// Storage layer consumed by the checker

pub mod redis_store;

use crate::errors::StorageError;
use crate::models::{MetricEvent, TriggerId};
use async_trait::async_trait;

pub use redis_store::RedisStore;

/// Store operations the checker engine depends on
#[async_trait]
pub trait CheckerStore: Send + Sync {
    /// Pop up to `count` pending metric events
    async fn pop_metric_events(&self, count: i64) -> Result<Vec<MetricEvent>, StorageError>;

    /// Trigger IDs bound to `pattern`
    async fn get_pattern_trigger_ids(&self, pattern: &str) -> Result<Vec<TriggerId>, StorageError>;

    /// Remove `pattern` together with every metric series stored under it
    async fn remove_pattern_with_metrics(&self, pattern: &str) -> Result<(), StorageError>;

    async fn add_local_triggers_to_check(&self, trigger_ids: &[TriggerId])
        -> Result<(), StorageError>;

    async fn add_remote_triggers_to_check(
        &self,
        trigger_ids: &[TriggerId],
    ) -> Result<(), StorageError>;

    async fn get_local_triggers_to_check(&self, count: usize)
        -> Result<Vec<TriggerId>, StorageError>;

    async fn get_remote_triggers_to_check(
        &self,
        count: usize,
    ) -> Result<Vec<TriggerId>, StorageError>;

    async fn get_local_triggers_to_check_count(&self) -> Result<i64, StorageError>;

    async fn get_remote_triggers_to_check_count(&self) -> Result<i64, StorageError>;

    /// Every trigger evaluated against local metrics
    async fn get_local_trigger_ids(&self) -> Result<Vec<TriggerId>, StorageError>;

    /// Every trigger evaluated against the remote source
    async fn get_remote_trigger_ids(&self) -> Result<Vec<TriggerId>, StorageError>;

    /// Triggers nobody subscribes to; checked lazily
    async fn get_unused_trigger_ids(&self) -> Result<Vec<TriggerId>, StorageError>;

    /// Try to take the per-trigger check lock; `false` when another checker holds it
    async fn set_trigger_check_lock(&self, trigger_id: &str) -> Result<bool, StorageError>;

    async fn delete_trigger_check_lock(&self, trigger_id: &str) -> Result<(), StorageError>;
}
