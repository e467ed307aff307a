// Backpressure gauges: metric-event channel occupancy and to-check queue depth

use crate::errors::CheckerError;
use crate::models::{Destination, MetricEvent};
use crate::storage::CheckerStore;
use crate::telemetry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

/// Default sampling period for both monitors
pub const BACKPRESSURE_SAMPLE_PERIOD: Duration = Duration::from_millis(100);

/// Samples how many metric events wait in the in-process channel
pub struct ChannelMonitor {
    sender: mpsc::WeakSender<MetricEvent>,
    period: Duration,
}

impl ChannelMonitor {
    /// Watches the channel without keeping it open
    pub fn new(sender: &mpsc::Sender<MetricEvent>, period: Duration) -> Self {
        Self {
            sender: sender.downgrade(),
            period,
        }
    }

    /// Current occupancy, `None` once the channel is closed
    pub fn occupancy(&self) -> Option<usize> {
        let sender = self.sender.upgrade()?;
        Some(sender.max_capacity() - sender.capacity())
    }

    pub async fn run(self, token: CancellationToken) -> Result<(), CheckerError> {
        let mut ticker = interval(self.period);
        loop {
            tokio::select! {
                _ = token.cancelled() => return Ok(()),
                _ = ticker.tick() => match self.occupancy() {
                    Some(len) => telemetry::update_metric_events_channel_len(len),
                    None => return Ok(()),
                },
            }
        }
    }
}

/// Samples the store's to-check queue depth for each enabled destination
pub struct QueueDepthMonitor {
    store: Arc<dyn CheckerStore>,
    remote_enabled: bool,
    period: Duration,
}

impl QueueDepthMonitor {
    pub fn new(store: Arc<dyn CheckerStore>, remote_enabled: bool, period: Duration) -> Self {
        Self {
            store,
            remote_enabled,
            period,
        }
    }

    /// Publish one sample; store errors leave the previous gauge value in place
    pub async fn sample(&self) {
        if let Ok(count) = self.store.get_local_triggers_to_check_count().await {
            telemetry::update_triggers_to_check(Destination::Local, count);
        }
        if self.remote_enabled {
            if let Ok(count) = self.store.get_remote_triggers_to_check_count().await {
                telemetry::update_triggers_to_check(Destination::Remote, count);
            }
        }
    }

    pub async fn run(self, token: CancellationToken) -> Result<(), CheckerError> {
        let mut ticker = interval(self.period);
        loop {
            tokio::select! {
                _ = token.cancelled() => return Ok(()),
                _ = ticker.tick() => self.sample().await,
            }
        }
    }
}
