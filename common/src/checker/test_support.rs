// In-memory store used by the checker unit tests

use crate::errors::StorageError;
use crate::models::{MetricEvent, TriggerId};
use crate::storage::CheckerStore;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

#[derive(Default)]
struct State {
    events: VecDeque<MetricEvent>,
    pattern_triggers: HashMap<String, Vec<TriggerId>>,
    local_queue: VecDeque<TriggerId>,
    remote_queue: VecDeque<TriggerId>,
    local_adds: Vec<Vec<TriggerId>>,
    remote_adds: Vec<Vec<TriggerId>>,
    removed_patterns: Vec<String>,
    local_trigger_ids: Vec<TriggerId>,
    remote_trigger_ids: Vec<TriggerId>,
    unused_trigger_ids: Vec<TriggerId>,
    locks: HashSet<TriggerId>,
    remote_count_calls: usize,
    fail_adds: bool,
    fail_lookups: bool,
    fail_counts: bool,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn push_event(&self, pattern: &str) {
        self.state().events.push_back(MetricEvent::new(pattern));
    }

    pub fn bind(&self, pattern: &str, trigger_ids: &[&str]) {
        self.state().pattern_triggers.insert(
            pattern.to_string(),
            trigger_ids.iter().map(|id| id.to_string()).collect(),
        );
    }

    pub fn set_local_trigger_ids(&self, trigger_ids: &[&str]) {
        self.state().local_trigger_ids = trigger_ids.iter().map(|id| id.to_string()).collect();
    }

    pub fn set_remote_trigger_ids(&self, trigger_ids: &[&str]) {
        self.state().remote_trigger_ids = trigger_ids.iter().map(|id| id.to_string()).collect();
    }

    pub fn set_unused_trigger_ids(&self, trigger_ids: &[&str]) {
        self.state().unused_trigger_ids = trigger_ids.iter().map(|id| id.to_string()).collect();
    }

    pub fn enqueue_local(&self, trigger_ids: &[&str]) {
        self.state()
            .local_queue
            .extend(trigger_ids.iter().map(|id| id.to_string()));
    }

    pub fn hold_lock(&self, trigger_id: &str) {
        self.state().locks.insert(trigger_id.to_string());
    }

    pub fn is_locked(&self, trigger_id: &str) -> bool {
        self.state().locks.contains(trigger_id)
    }

    pub fn fail_adds(&self, fail: bool) {
        self.state().fail_adds = fail;
    }

    pub fn fail_lookups(&self, fail: bool) {
        self.state().fail_lookups = fail;
    }

    pub fn fail_counts(&self, fail: bool) {
        self.state().fail_counts = fail;
    }

    pub fn local_adds(&self) -> Vec<Vec<TriggerId>> {
        self.state().local_adds.clone()
    }

    pub fn remote_adds(&self) -> Vec<Vec<TriggerId>> {
        self.state().remote_adds.clone()
    }

    pub fn removed_patterns(&self) -> Vec<String> {
        self.state().removed_patterns.clone()
    }

    pub fn remote_count_calls(&self) -> usize {
        self.state().remote_count_calls
    }
}

fn drain(queue: &mut VecDeque<TriggerId>, count: usize) -> Vec<TriggerId> {
    let take = count.min(queue.len());
    queue.drain(..take).collect()
}

#[async_trait]
impl CheckerStore for MemoryStore {
    async fn pop_metric_events(&self, count: i64) -> Result<Vec<MetricEvent>, StorageError> {
        let mut state = self.state();
        let take = (count.max(0) as usize).min(state.events.len());
        Ok(state.events.drain(..take).collect())
    }

    async fn get_pattern_trigger_ids(&self, pattern: &str) -> Result<Vec<TriggerId>, StorageError> {
        let state = self.state();
        if state.fail_lookups {
            return Err(StorageError::QueryFailed("lookup failed".to_string()));
        }
        Ok(state.pattern_triggers.get(pattern).cloned().unwrap_or_default())
    }

    async fn remove_pattern_with_metrics(&self, pattern: &str) -> Result<(), StorageError> {
        let mut state = self.state();
        state.pattern_triggers.remove(pattern);
        state.removed_patterns.push(pattern.to_string());
        Ok(())
    }

    async fn add_local_triggers_to_check(
        &self,
        trigger_ids: &[TriggerId],
    ) -> Result<(), StorageError> {
        let mut state = self.state();
        if state.fail_adds {
            return Err(StorageError::RedisError("add failed".to_string()));
        }
        state.local_adds.push(trigger_ids.to_vec());
        state.local_queue.extend(trigger_ids.iter().cloned());
        Ok(())
    }

    async fn add_remote_triggers_to_check(
        &self,
        trigger_ids: &[TriggerId],
    ) -> Result<(), StorageError> {
        let mut state = self.state();
        if state.fail_adds {
            return Err(StorageError::RedisError("add failed".to_string()));
        }
        state.remote_adds.push(trigger_ids.to_vec());
        state.remote_queue.extend(trigger_ids.iter().cloned());
        Ok(())
    }

    async fn get_local_triggers_to_check(
        &self,
        count: usize,
    ) -> Result<Vec<TriggerId>, StorageError> {
        Ok(drain(&mut self.state().local_queue, count))
    }

    async fn get_remote_triggers_to_check(
        &self,
        count: usize,
    ) -> Result<Vec<TriggerId>, StorageError> {
        Ok(drain(&mut self.state().remote_queue, count))
    }

    async fn get_local_triggers_to_check_count(&self) -> Result<i64, StorageError> {
        let state = self.state();
        if state.fail_counts {
            return Err(StorageError::RedisError("count failed".to_string()));
        }
        Ok(state.local_queue.len() as i64)
    }

    async fn get_remote_triggers_to_check_count(&self) -> Result<i64, StorageError> {
        let mut state = self.state();
        state.remote_count_calls += 1;
        Ok(state.remote_queue.len() as i64)
    }

    async fn get_local_trigger_ids(&self) -> Result<Vec<TriggerId>, StorageError> {
        Ok(self.state().local_trigger_ids.clone())
    }

    async fn get_remote_trigger_ids(&self) -> Result<Vec<TriggerId>, StorageError> {
        Ok(self.state().remote_trigger_ids.clone())
    }

    async fn get_unused_trigger_ids(&self) -> Result<Vec<TriggerId>, StorageError> {
        Ok(self.state().unused_trigger_ids.clone())
    }

    async fn set_trigger_check_lock(&self, trigger_id: &str) -> Result<bool, StorageError> {
        Ok(self.state().locks.insert(trigger_id.to_string()))
    }

    async fn delete_trigger_check_lock(&self, trigger_id: &str) -> Result<(), StorageError> {
        self.state().locks.remove(trigger_id);
        Ok(())
    }
}
