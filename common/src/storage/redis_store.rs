// Redis-backed implementation of the checker store

use crate::db::RedisConnection;
use crate::errors::StorageError;
use crate::models::{MetricEvent, TriggerId};
use crate::storage::CheckerStore;
use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::{debug, instrument, warn};

const PATTERNS_LIST_KEY: &str = "moira-pattern-list";
const METRIC_EVENTS_KEY: &str = "moira-metric-events";
const LOCAL_TRIGGERS_TO_CHECK_KEY: &str = "moira-triggers-to-check";
const REMOTE_TRIGGERS_TO_CHECK_KEY: &str = "moira-remote-triggers-to-check";
const LOCAL_TRIGGERS_LIST_KEY: &str = "moira-triggers-list";
const REMOTE_TRIGGERS_LIST_KEY: &str = "moira-remote-triggers-list";
const UNUSED_TRIGGERS_KEY: &str = "moira-unused-triggers";

/// Lifetime of a per-trigger check lock, in seconds
pub const TRIGGER_CHECK_LOCK_TTL_SECONDS: u64 = 30;

fn pattern_triggers_key(pattern: &str) -> String {
    format!("moira-pattern-triggers:{}", pattern)
}

fn pattern_metrics_key(pattern: &str) -> String {
    format!("moira-pattern-metrics:{}", pattern)
}

fn metric_data_key(metric: &str) -> String {
    format!("moira-metric-data:{}", metric)
}

fn metric_retention_key(metric: &str) -> String {
    format!("moira-metric-retention:{}", metric)
}

fn trigger_check_lock_key(trigger_id: &str) -> String {
    format!("moira-check-lock:{}", trigger_id)
}

/// Checker store on top of a Redis connection manager
#[derive(Clone)]
pub struct RedisStore {
    redis: RedisConnection,
}

impl RedisStore {
    pub fn new(redis: RedisConnection) -> Self {
        Self { redis }
    }

    async fn pop_set(&self, key: &str, count: usize) -> Result<Vec<TriggerId>, StorageError> {
        let mut conn = self.redis.manager();
        let ids: Vec<TriggerId> = redis::cmd("SPOP")
            .arg(key)
            .arg(count)
            .query_async(&mut conn)
            .await?;
        Ok(ids)
    }

    async fn add_to_set(&self, key: &str, members: &[TriggerId]) -> Result<(), StorageError> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.redis.manager();
        let _: () = conn.sadd(key, members).await?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<TriggerId>, StorageError> {
        let mut conn = self.redis.manager();
        let members: Vec<TriggerId> = conn.smembers(key).await?;
        Ok(members)
    }

    async fn set_size(&self, key: &str) -> Result<i64, StorageError> {
        let mut conn = self.redis.manager();
        let size: i64 = conn.scard(key).await?;
        Ok(size)
    }
}

#[async_trait]
impl CheckerStore for RedisStore {
    #[instrument(skip(self))]
    async fn pop_metric_events(&self, count: i64) -> Result<Vec<MetricEvent>, StorageError> {
        let mut conn = self.redis.manager();
        let raw: Vec<String> = redis::cmd("SPOP")
            .arg(METRIC_EVENTS_KEY)
            .arg(count)
            .query_async(&mut conn)
            .await?;

        let mut events = Vec::with_capacity(raw.len());
        for payload in raw {
            match serde_json::from_str::<MetricEvent>(&payload) {
                Ok(event) => events.push(event),
                Err(e) => {
                    // One malformed payload must not drop the rest of the batch
                    warn!(error = %e, payload = %payload, "Skipping malformed metric event");
                }
            }
        }
        Ok(events)
    }

    async fn get_pattern_trigger_ids(&self, pattern: &str) -> Result<Vec<TriggerId>, StorageError> {
        self.set_members(&pattern_triggers_key(pattern)).await
    }

    #[instrument(skip(self))]
    async fn remove_pattern_with_metrics(&self, pattern: &str) -> Result<(), StorageError> {
        let mut conn = self.redis.manager();
        let metrics: Vec<String> = conn.smembers(pattern_metrics_key(pattern)).await?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .srem(PATTERNS_LIST_KEY, pattern)
            .ignore()
            .del(pattern_metrics_key(pattern))
            .ignore();
        for metric in &metrics {
            pipe.del(metric_data_key(metric))
                .ignore()
                .del(metric_retention_key(metric))
                .ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;

        debug!(pattern = %pattern, metrics = metrics.len(), "Removed pattern with metrics");
        Ok(())
    }

    async fn add_local_triggers_to_check(
        &self,
        trigger_ids: &[TriggerId],
    ) -> Result<(), StorageError> {
        self.add_to_set(LOCAL_TRIGGERS_TO_CHECK_KEY, trigger_ids).await
    }

    async fn add_remote_triggers_to_check(
        &self,
        trigger_ids: &[TriggerId],
    ) -> Result<(), StorageError> {
        self.add_to_set(REMOTE_TRIGGERS_TO_CHECK_KEY, trigger_ids).await
    }

    async fn get_local_triggers_to_check(
        &self,
        count: usize,
    ) -> Result<Vec<TriggerId>, StorageError> {
        self.pop_set(LOCAL_TRIGGERS_TO_CHECK_KEY, count).await
    }

    async fn get_remote_triggers_to_check(
        &self,
        count: usize,
    ) -> Result<Vec<TriggerId>, StorageError> {
        self.pop_set(REMOTE_TRIGGERS_TO_CHECK_KEY, count).await
    }

    async fn get_local_triggers_to_check_count(&self) -> Result<i64, StorageError> {
        self.set_size(LOCAL_TRIGGERS_TO_CHECK_KEY).await
    }

    async fn get_remote_triggers_to_check_count(&self) -> Result<i64, StorageError> {
        self.set_size(REMOTE_TRIGGERS_TO_CHECK_KEY).await
    }

    async fn get_local_trigger_ids(&self) -> Result<Vec<TriggerId>, StorageError> {
        self.set_members(LOCAL_TRIGGERS_LIST_KEY).await
    }

    async fn get_remote_trigger_ids(&self) -> Result<Vec<TriggerId>, StorageError> {
        self.set_members(REMOTE_TRIGGERS_LIST_KEY).await
    }

    async fn get_unused_trigger_ids(&self) -> Result<Vec<TriggerId>, StorageError> {
        self.set_members(UNUSED_TRIGGERS_KEY).await
    }

    async fn set_trigger_check_lock(&self, trigger_id: &str) -> Result<bool, StorageError> {
        let mut conn = self.redis.manager();
        let reply: Option<String> = redis::cmd("SET")
            .arg(trigger_check_lock_key(trigger_id))
            .arg(1)
            .arg("NX")
            .arg("EX")
            .arg(TRIGGER_CHECK_LOCK_TTL_SECONDS)
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn delete_trigger_check_lock(&self, trigger_id: &str) -> Result<(), StorageError> {
        let mut conn = self.redis.manager();
        let _: () = conn.del(trigger_check_lock_key(trigger_id)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RedisConfig;

    #[test]
    fn test_key_layout() {
        assert_eq!(pattern_triggers_key("cpu.*"), "moira-pattern-triggers:cpu.*");
        assert_eq!(pattern_metrics_key("cpu.*"), "moira-pattern-metrics:cpu.*");
        assert_eq!(metric_data_key("cpu.host1"), "moira-metric-data:cpu.host1");
        assert_eq!(metric_retention_key("cpu.host1"), "moira-metric-retention:cpu.host1");
        assert_eq!(trigger_check_lock_key("t1"), "moira-check-lock:t1");
    }

    async fn connect() -> RedisStore {
        let config = RedisConfig {
            url: "redis://localhost:6379".to_string(),
            connect_timeout_seconds: 5,
        };
        RedisStore::new(RedisConnection::connect(&config).await.unwrap())
    }

    #[tokio::test]
    #[ignore] // Requires Redis to be running
    async fn test_local_triggers_to_check_round_trip() {
        let store = connect().await;
        let ids = vec!["redis-test-t1".to_string(), "redis-test-t2".to_string()];

        store.add_local_triggers_to_check(&ids).await.unwrap();
        assert!(store.get_local_triggers_to_check_count().await.unwrap() >= 2);

        let mut popped = store.get_local_triggers_to_check(100).await.unwrap();
        popped.sort();
        for id in &ids {
            assert!(popped.contains(id));
        }
    }

    #[tokio::test]
    #[ignore] // Requires Redis to be running
    async fn test_trigger_check_lock_is_exclusive() {
        let store = connect().await;
        let id = "redis-test-lock";
        store.delete_trigger_check_lock(id).await.unwrap();

        assert!(store.set_trigger_check_lock(id).await.unwrap());
        assert!(!store.set_trigger_check_lock(id).await.unwrap());

        store.delete_trigger_check_lock(id).await.unwrap();
        assert!(store.set_trigger_check_lock(id).await.unwrap());
        store.delete_trigger_check_lock(id).await.unwrap();
    }
}
