// Checker engine: configuration resolution and the supervised task layout

use crate::cache::{CacheJanitor, DedupCache};
use crate::checker::admission::AdmissionGate;
use crate::checker::consumer::{
    metric_events_channel, MetricEventConsumer, MetricEventPump, Watermark,
};
use crate::checker::lazy::{LazyTriggers, LazyTriggersRefresher, LAZY_TRIGGERS_REFRESH_PERIOD};
use crate::checker::monitor::{ChannelMonitor, QueueDepthMonitor, BACKPRESSURE_SAMPLE_PERIOD};
use crate::checker::queue::{trigger_channel, TriggerChecker, TriggerHandler, TriggerQueuePoller};
use crate::checker::scanner::{NoDataScanner, RemoteScanner};
use crate::config::{CheckerSettings, RemoteSettings};
use crate::errors::CheckerError;
use crate::models::{Destination, SubscribeMetricEventsParams};
use crate::remote::RemoteSourceProvider;
use crate::storage::CheckerStore;
use crate::supervisor::TaskGroup;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// Upper bound for both parallelism settings
pub const MAX_PARALLEL_CHECKS_LIMIT: usize = 8192;

/// Batch size used when the configured one is zero
pub const DEFAULT_METRIC_EVENT_POP_BATCH_SIZE: i64 = 100;

/// Runtime configuration for the checker
#[derive(Debug, Clone)]
pub struct CheckerConfig {
    /// Local worker pool size and consumer count; 0 means one per logical CPU
    pub max_parallel_checks: usize,
    /// Remote worker pool size; 0 means one per logical CPU
    pub max_parallel_remote_checks: usize,
    /// Events popped per store call; 0 means 100, negative is rejected
    pub metric_event_pop_batch_size: i64,
    pub metric_event_pop_delay: Duration,
    /// Primary trigger and pattern dedup window
    pub check_interval: Duration,
    pub lazy_triggers_check_interval: Duration,
    pub nodata_check_interval: Duration,
    pub stop_checking_interval: Duration,
    pub remote_check_interval: Duration,
    pub cache_cleanup_interval: Duration,
    pub backpressure_sample_period: Duration,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            max_parallel_checks: 0,
            max_parallel_remote_checks: 0,
            metric_event_pop_batch_size: 0,
            metric_event_pop_delay: Duration::ZERO,
            check_interval: Duration::from_secs(10),
            lazy_triggers_check_interval: Duration::from_secs(600),
            nodata_check_interval: Duration::from_secs(60),
            stop_checking_interval: Duration::from_secs(30),
            remote_check_interval: Duration::from_secs(60),
            cache_cleanup_interval: Duration::from_secs(3600),
            backpressure_sample_period: BACKPRESSURE_SAMPLE_PERIOD,
        }
    }
}

impl CheckerConfig {
    pub fn from_settings(checker: &CheckerSettings, remote: &RemoteSettings) -> Self {
        Self {
            max_parallel_checks: checker.max_parallel_checks,
            max_parallel_remote_checks: checker.max_parallel_remote_checks,
            metric_event_pop_batch_size: checker.metric_event_pop_batch_size,
            metric_event_pop_delay: Duration::from_millis(checker.metric_event_pop_delay_ms),
            check_interval: Duration::from_secs(checker.check_interval_seconds),
            lazy_triggers_check_interval: Duration::from_secs(
                checker.lazy_triggers_check_interval_seconds,
            ),
            nodata_check_interval: Duration::from_secs(checker.nodata_check_interval_seconds),
            stop_checking_interval: Duration::from_secs(checker.stop_checking_interval_seconds),
            remote_check_interval: Duration::from_secs(remote.check_interval_seconds),
            cache_cleanup_interval: Duration::from_secs(checker.cache_cleanup_interval_seconds),
            backpressure_sample_period: BACKPRESSURE_SAMPLE_PERIOD,
        }
    }

    /// Apply defaults and validate every bound
    pub fn resolve(mut self) -> Result<Self, CheckerError> {
        self.max_parallel_checks = resolve_parallelism("MaxParallelChecks", self.max_parallel_checks)?;
        self.max_parallel_remote_checks =
            resolve_parallelism("MaxParallelRemoteChecks", self.max_parallel_remote_checks)?;

        if self.metric_event_pop_batch_size < 0 {
            return Err(CheckerError::InvalidConfiguration(format!(
                "MetricEventPopBatchSize param was less than zero: {}",
                self.metric_event_pop_batch_size
            )));
        }
        if self.metric_event_pop_batch_size == 0 {
            self.metric_event_pop_batch_size = DEFAULT_METRIC_EVENT_POP_BATCH_SIZE;
        }

        for (name, period) in [
            ("NoDataCheckInterval", self.nodata_check_interval),
            ("RemoteCheckInterval", self.remote_check_interval),
            ("CacheCleanupInterval", self.cache_cleanup_interval),
            ("BackpressureSamplePeriod", self.backpressure_sample_period),
        ] {
            if period.is_zero() {
                return Err(CheckerError::InvalidConfiguration(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }

        Ok(self)
    }

    /// Base TTL for lazy trigger admissions
    pub fn lazy_base_ttl(&self) -> Duration {
        self.lazy_triggers_check_interval / 2
    }

    fn lazy_refresher_enabled(&self) -> bool {
        self.lazy_triggers_check_interval > self.check_interval
    }
}

fn resolve_parallelism(name: &str, value: usize) -> Result<usize, CheckerError> {
    if value == 0 {
        return Ok(std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1));
    }
    if value > MAX_PARALLEL_CHECKS_LIMIT {
        return Err(CheckerError::InvalidConfiguration(format!(
            "{} value is too large: {} > {}",
            name, value, MAX_PARALLEL_CHECKS_LIMIT
        )));
    }
    Ok(value)
}

/// Trigger check scheduler
///
/// Owns the dedup caches, the lazy trigger snapshot and the watermark, and runs every
/// checker task inside one [`TaskGroup`].
pub struct Checker {
    config: CheckerConfig,
    store: Arc<dyn CheckerStore>,
    trigger_checker: Arc<dyn TriggerChecker>,
    remote_provider: RemoteSourceProvider,
    trigger_cache: Arc<DedupCache>,
    pattern_cache: Arc<DedupCache>,
    lazy_triggers_cache: Arc<DedupCache>,
    lazy_triggers: Arc<LazyTriggers>,
    watermark: Arc<Watermark>,
    tasks: TaskGroup,
    started: AtomicBool,
    remote_enabled: AtomicBool,
}

impl Checker {
    pub fn new(
        config: CheckerConfig,
        store: Arc<dyn CheckerStore>,
        trigger_checker: Arc<dyn TriggerChecker>,
        remote_provider: RemoteSourceProvider,
    ) -> Self {
        let trigger_cache = Arc::new(DedupCache::new("trigger", config.check_interval));
        let pattern_cache = Arc::new(DedupCache::new("pattern", config.check_interval));
        let lazy_triggers_cache = Arc::new(DedupCache::new(
            "lazy-trigger",
            config.lazy_triggers_check_interval,
        ));

        Self {
            config,
            store,
            trigger_checker,
            remote_provider,
            trigger_cache,
            pattern_cache,
            lazy_triggers_cache,
            lazy_triggers: Arc::new(LazyTriggers::new()),
            watermark: Arc::new(Watermark::new()),
            tasks: TaskGroup::new(),
            started: AtomicBool::new(false),
            remote_enabled: AtomicBool::new(false),
        }
    }

    /// Validate the configuration and launch every checker task
    ///
    /// Returns as soon as the tasks are spawned. Must be called from within a tokio
    /// runtime. A configuration error is returned before anything is launched.
    #[instrument(skip(self))]
    pub fn start(&self) -> Result<(), CheckerError> {
        let config = self.config.clone().resolve()?;
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(CheckerError::AlreadyStarted);
        }

        info!(
            max_parallel_checks = config.max_parallel_checks,
            max_parallel_remote_checks = config.max_parallel_remote_checks,
            metric_event_pop_batch_size = config.metric_event_pop_batch_size,
            "Starting trigger checker"
        );

        self.watermark.touch();
        let gate = Arc::new(AdmissionGate::new(
            Arc::clone(&self.store),
            Arc::clone(&self.trigger_cache),
            Arc::clone(&self.lazy_triggers_cache),
            Arc::clone(&self.lazy_triggers),
            config.lazy_base_ttl(),
        ));

        if config.lazy_refresher_enabled() {
            let refresher = LazyTriggersRefresher::new(
                Arc::clone(&self.store),
                Arc::clone(&self.lazy_triggers),
                LAZY_TRIGGERS_REFRESH_PERIOD,
            );
            self.tasks
                .spawn("lazy-triggers-refresher", refresher.run(self.tasks.token()));
        }

        self.spawn_trigger_pool(Destination::Local, config.max_parallel_checks);

        let (events_tx, events_rx) = metric_events_channel(config.metric_event_pop_batch_size);
        let channel_monitor = ChannelMonitor::new(&events_tx, config.backpressure_sample_period);
        let pump = MetricEventPump::new(
            Arc::clone(&self.store),
            SubscribeMetricEventsParams {
                batch_size: config.metric_event_pop_batch_size,
                delay: config.metric_event_pop_delay,
            },
            events_tx,
        );
        self.tasks
            .spawn("metric-events-pump", pump.run(self.tasks.token()));

        let consumer = Arc::new(MetricEventConsumer::new(
            Arc::clone(&self.store),
            Arc::clone(&self.pattern_cache),
            Arc::clone(&gate),
            Arc::clone(&self.watermark),
            events_rx,
        ));
        for i in 0..config.max_parallel_checks {
            let consumer = Arc::clone(&consumer);
            let token = self.tasks.token();
            self.tasks
                .spawn(format!("metric-events-consumer-{}", i), async move {
                    consumer.run(token).await
                });
        }

        let nodata = NoDataScanner::new(
            Arc::clone(&self.store),
            Arc::clone(&gate),
            Arc::clone(&self.watermark),
            config.stop_checking_interval,
            config.nodata_check_interval,
        );
        self.tasks
            .spawn("nodata-scanner", nodata.run(self.tasks.token()));

        match self.remote_provider.get_remote() {
            Ok(remote) => {
                self.remote_enabled.store(true, Ordering::SeqCst);
                self.spawn_trigger_pool(Destination::Remote, config.max_parallel_remote_checks);
                let scanner = RemoteScanner::new(
                    Arc::clone(&self.store),
                    Arc::clone(&gate),
                    remote,
                    config.remote_check_interval,
                );
                self.tasks
                    .spawn("remote-scanner", scanner.run(self.tasks.token()));
            }
            Err(e) => {
                warn!(error = %e, "Remote triggers checking disabled");
            }
        }

        self.tasks.spawn(
            "metric-events-channel-monitor",
            channel_monitor.run(self.tasks.token()),
        );
        let depth_monitor = QueueDepthMonitor::new(
            Arc::clone(&self.store),
            self.remote_enabled(),
            config.backpressure_sample_period,
        );
        self.tasks.spawn(
            "triggers-to-check-monitor",
            depth_monitor.run(self.tasks.token()),
        );

        let janitor = CacheJanitor::new(
            vec![
                Arc::clone(&self.trigger_cache),
                Arc::clone(&self.pattern_cache),
                Arc::clone(&self.lazy_triggers_cache),
            ],
            config.cache_cleanup_interval,
        );
        self.tasks
            .spawn("cache-janitor", janitor.run(self.tasks.token()));

        info!(tasks = self.tasks.spawned_tasks().len(), "Trigger checker started");
        Ok(())
    }

    fn spawn_trigger_pool(&self, destination: Destination, parallelism: usize) {
        let (tx, rx) = trigger_channel(parallelism);
        let poller = TriggerQueuePoller::new(Arc::clone(&self.store), destination, parallelism, tx);
        self.tasks.spawn(
            format!("{}-triggers-poller", destination),
            poller.run(self.tasks.token()),
        );

        let handler = Arc::new(TriggerHandler::new(
            Arc::clone(&self.store),
            Arc::clone(&self.trigger_checker),
            destination,
            rx,
        ));
        for i in 0..parallelism {
            let handler = Arc::clone(&handler);
            let token = self.tasks.token();
            self.tasks
                .spawn(format!("{}-trigger-handler-{}", destination, i), async move {
                    handler.run(token).await
                });
        }
    }

    /// Cancel every task and wait for all of them to return
    ///
    /// Returns the first error any task produced.
    #[instrument(skip(self))]
    pub async fn stop(&self) -> Result<(), CheckerError> {
        info!("Stopping trigger checker");
        self.tasks.kill();
        let result = self.tasks.wait().await;
        info!("Trigger checker stopped");
        result
    }

    /// UTC epoch seconds of the last processed metric event
    pub fn last_data(&self) -> i64 {
        self.watermark.get()
    }

    /// Whether the remote pipeline was launched by `start`
    pub fn remote_enabled(&self) -> bool {
        self.remote_enabled.load(Ordering::SeqCst)
    }

    /// Names of the launched tasks, in launch order
    pub fn spawned_tasks(&self) -> Vec<String> {
        self.tasks.spawned_tasks()
    }

    /// Whether the cancellation signal has been raised, by `stop` or by a failed task
    pub fn is_dying(&self) -> bool {
        self.tasks.is_dying()
    }

    /// Resolves once the cancellation signal is raised
    pub async fn dying(&self) {
        let token = self.tasks.token();
        token.cancelled().await;
    }
}
