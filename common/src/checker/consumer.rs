// Metric-event intake: the pump draining the store and the competing consumers

use crate::cache::DedupCache;
use crate::checker::admission::AdmissionGate;
use crate::errors::{CheckerError, StorageError};
use crate::models::{Destination, MetricEvent, SubscribeMetricEventsParams};
use crate::storage::CheckerStore;
use crate::telemetry;
use chrono::Utc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Pause after a failed pop
const POP_ERROR_DELAY: Duration = Duration::from_secs(1);
/// Pause after an empty pop when no pop delay is configured
const IDLE_POP_DELAY: Duration = Duration::from_millis(100);

/// UTC epoch seconds of the last processed metric event
#[derive(Debug)]
pub struct Watermark(AtomicI64);

impl Default for Watermark {
    fn default() -> Self {
        Self::new()
    }
}

impl Watermark {
    pub fn new() -> Self {
        Self(AtomicI64::new(Utc::now().timestamp()))
    }

    pub fn touch(&self) {
        self.0.store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn set(&self, timestamp: i64) {
        self.0.store(timestamp, Ordering::Relaxed);
    }

    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }

    /// Seconds elapsed since the watermark was last moved
    pub fn age_seconds(&self) -> i64 {
        Utc::now().timestamp() - self.get()
    }
}

/// Largest metric-event channel; bigger pop batches wait on the channel instead
pub const METRIC_EVENTS_CHANNEL_LIMIT: usize = 8192;

/// Receiving half shared by competing consumers
pub type SharedReceiver<T> = Arc<Mutex<mpsc::Receiver<T>>>;

/// Bounded channel for metric events; capacity follows the pop batch size up to a limit
pub fn metric_events_channel(
    batch_size: i64,
) -> (mpsc::Sender<MetricEvent>, SharedReceiver<MetricEvent>) {
    let capacity = usize::try_from(batch_size)
        .unwrap_or(0)
        .clamp(1, METRIC_EVENTS_CHANNEL_LIMIT);
    let (tx, rx) = mpsc::channel(capacity);
    (tx, Arc::new(Mutex::new(rx)))
}

/// Pops metric events from the store and feeds the in-process channel
pub struct MetricEventPump {
    store: Arc<dyn CheckerStore>,
    params: SubscribeMetricEventsParams,
    sender: mpsc::Sender<MetricEvent>,
}

impl MetricEventPump {
    pub fn new(
        store: Arc<dyn CheckerStore>,
        params: SubscribeMetricEventsParams,
        sender: mpsc::Sender<MetricEvent>,
    ) -> Self {
        Self {
            store,
            params,
            sender,
        }
    }

    pub async fn run(self, token: CancellationToken) -> Result<(), CheckerError> {
        info!(
            batch_size = self.params.batch_size,
            pop_delay_ms = self.params.delay.as_millis() as u64,
            "Starting metric events pump"
        );

        loop {
            let delay = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                popped = self.store.pop_metric_events(self.params.batch_size) => match popped {
                    Ok(events) if events.is_empty() => self.params.delay.max(IDLE_POP_DELAY),
                    Ok(events) => {
                        for event in events {
                            tokio::select! {
                                biased;
                                _ = token.cancelled() => return Ok(()),
                                sent = self.sender.send(event) => {
                                    if sent.is_err() {
                                        // Every consumer is gone
                                        return Ok(());
                                    }
                                }
                            }
                        }
                        self.params.delay
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to pop metric events");
                        POP_ERROR_DELAY
                    }
                }
            };

            if !delay.is_zero() {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = sleep(delay) => {}
                }
            }
        }

        info!("Metric events pump stopped");
        Ok(())
    }
}

/// Resolves metric events into trigger IDs and hands them to the admission gate
pub struct MetricEventConsumer {
    store: Arc<dyn CheckerStore>,
    pattern_cache: Arc<DedupCache>,
    gate: Arc<AdmissionGate>,
    watermark: Arc<Watermark>,
    events: SharedReceiver<MetricEvent>,
}

impl MetricEventConsumer {
    pub fn new(
        store: Arc<dyn CheckerStore>,
        pattern_cache: Arc<DedupCache>,
        gate: Arc<AdmissionGate>,
        watermark: Arc<Watermark>,
        events: SharedReceiver<MetricEvent>,
    ) -> Self {
        Self {
            store,
            pattern_cache,
            gate,
            watermark,
            events,
        }
    }

    /// Consume events until cancelled or the channel closes
    ///
    /// Several tasks may run this on one consumer; each event reaches exactly one of them.
    pub async fn run(&self, token: CancellationToken) -> Result<(), CheckerError> {
        loop {
            let event = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(()),
                event = self.next_event() => match event {
                    Some(event) => event,
                    None => return Ok(()),
                },
            };
            self.process(event).await;
        }
    }

    async fn next_event(&self) -> Option<MetricEvent> {
        self.events.lock().await.recv().await
    }

    /// Handle one event if its pattern was not seen within the dedup window
    pub async fn process(&self, event: MetricEvent) {
        if !self.pattern_cache.admit(&event.pattern) {
            return;
        }
        if let Err(e) = self.handle_metric_event(&event.pattern).await {
            error!(pattern = %event.pattern, error = %e, "Failed to handle metric event");
        }
    }

    #[instrument(skip(self))]
    async fn handle_metric_event(&self, pattern: &str) -> Result<(), StorageError> {
        let started_at = Instant::now();
        self.watermark.touch();

        let result = self.resolve_pattern(pattern).await;
        telemetry::record_metric_event_handle_time(started_at.elapsed());
        result
    }

    async fn resolve_pattern(&self, pattern: &str) -> Result<(), StorageError> {
        let trigger_ids = self.store.get_pattern_trigger_ids(pattern).await?;

        if trigger_ids.is_empty() {
            // Nothing is bound to this pattern any more
            self.store.remove_pattern_with_metrics(pattern).await?;
            debug!(pattern = %pattern, "Removed orphaned pattern");
            return Ok(());
        }

        self.gate.admit(&trigger_ids, Destination::Local).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::lazy::LazyTriggers;
    use crate::checker::test_support::MemoryStore;

    fn consumer(store: Arc<MemoryStore>) -> (MetricEventConsumer, mpsc::Sender<MetricEvent>) {
        let gate = Arc::new(AdmissionGate::new(
            store.clone(),
            Arc::new(DedupCache::new("trigger", Duration::from_secs(10))),
            Arc::new(DedupCache::new("lazy", Duration::from_secs(600))),
            Arc::new(LazyTriggers::new()),
            Duration::from_secs(300),
        ));
        let (tx, rx) = metric_events_channel(10);
        let consumer = MetricEventConsumer::new(
            store,
            Arc::new(DedupCache::new("pattern", Duration::from_secs(10))),
            gate,
            Arc::new(Watermark::new()),
            rx,
        );
        (consumer, tx)
    }

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn test_repeated_pattern_is_resolved_once() {
        let store = Arc::new(MemoryStore::default());
        store.bind("p1", &["t1", "t2"]);
        let (consumer, _tx) = consumer(Arc::clone(&store));

        for _ in 0..3 {
            consumer.process(MetricEvent::new("p1")).await;
        }

        assert_eq!(store.local_adds(), vec![ids(&["t1", "t2"])]);
    }

    #[tokio::test]
    async fn test_orphaned_pattern_is_removed() {
        let store = Arc::new(MemoryStore::default());
        let (consumer, _tx) = consumer(Arc::clone(&store));

        consumer.process(MetricEvent::new("p2")).await;

        assert_eq!(store.removed_patterns(), vec!["p2".to_string()]);
        assert!(store.local_adds().is_empty());
    }

    #[tokio::test]
    async fn test_lookup_error_is_not_fatal() {
        let store = Arc::new(MemoryStore::default());
        store.fail_lookups(true);
        let (consumer, _tx) = consumer(Arc::clone(&store));

        consumer.process(MetricEvent::new("p1")).await;

        assert!(store.removed_patterns().is_empty());
        assert!(store.local_adds().is_empty());
    }

    #[tokio::test]
    async fn test_admitted_event_moves_watermark() {
        let store = Arc::new(MemoryStore::default());
        store.bind("p1", &["t1"]);
        let (consumer, _tx) = consumer(Arc::clone(&store));
        consumer.watermark.set(0);

        consumer.process(MetricEvent::new("p1")).await;

        assert!(consumer.watermark.get() > 0);
        assert!(consumer.watermark.age_seconds() <= 1);
    }

    #[tokio::test]
    async fn test_run_drains_channel_until_closed() {
        let store = Arc::new(MemoryStore::default());
        store.bind("p1", &["t1"]);
        store.bind("p3", &["t3"]);
        let (consumer, tx) = consumer(Arc::clone(&store));

        tx.send(MetricEvent::new("p1")).await.unwrap();
        tx.send(MetricEvent::new("p3")).await.unwrap();
        drop(tx);

        consumer.run(CancellationToken::new()).await.unwrap();
        assert_eq!(store.local_adds(), vec![ids(&["t1"]), ids(&["t3"])]);
    }

    #[test]
    fn test_channel_capacity_is_bounded() {
        let (tx, _rx) = metric_events_channel(i64::MAX);
        assert_eq!(tx.max_capacity(), METRIC_EVENTS_CHANNEL_LIMIT);

        let (tx, _rx) = metric_events_channel(100);
        assert_eq!(tx.max_capacity(), 100);

        let (tx, _rx) = metric_events_channel(-3);
        assert_eq!(tx.max_capacity(), 1);
    }

    #[tokio::test]
    async fn test_pump_forwards_popped_events() {
        let store = Arc::new(MemoryStore::default());
        store.push_event("p1");
        store.push_event("p2");
        let (tx, rx) = metric_events_channel(10);
        let token = CancellationToken::new();

        let pump = MetricEventPump::new(
            store,
            SubscribeMetricEventsParams {
                batch_size: 10,
                delay: Duration::ZERO,
            },
            tx,
        );
        let handle = tokio::spawn(pump.run(token.clone()));

        let mut rx = rx.lock().await;
        assert_eq!(rx.recv().await, Some(MetricEvent::new("p1")));
        assert_eq!(rx.recv().await, Some(MetricEvent::new("p2")));

        token.cancel();
        assert!(handle.await.unwrap().is_ok());
    }
}
