// To-check queue poller and the trigger worker pool behind it

use crate::checker::consumer::SharedReceiver;
use crate::errors::{CheckError, CheckerError, StorageError};
use crate::models::{Destination, TriggerId};
use crate::storage::CheckerStore;
use crate::supervisor::panic_message;
use crate::telemetry;
use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Wait before the next pull after an empty or failed fetch
pub const EMPTY_FETCH_DELAY: Duration = Duration::from_secs(1);

/// Evaluates one trigger; the actual alerting logic lives behind this seam
#[async_trait]
pub trait TriggerChecker: Send + Sync {
    async fn check(&self, trigger_id: &str) -> Result<(), CheckError>;
}

/// Trigger checker that only logs; used until a real evaluator is plugged in
pub struct LogTriggerChecker;

#[async_trait]
impl TriggerChecker for LogTriggerChecker {
    #[instrument(skip(self))]
    async fn check(&self, trigger_id: &str) -> Result<(), CheckError> {
        info!(trigger_id = %trigger_id, "Checking trigger");
        Ok(())
    }
}

/// Distribution channel between a poller and its worker pool, sized to the pool
pub fn trigger_channel(parallelism: usize) -> (mpsc::Sender<TriggerId>, SharedReceiver<TriggerId>) {
    let (tx, rx) = mpsc::channel(parallelism.max(1) * 2);
    (tx, Arc::new(Mutex::new(rx)))
}

/// Pulls due trigger IDs from one to-check queue and republishes them to the pool
pub struct TriggerQueuePoller {
    store: Arc<dyn CheckerStore>,
    destination: Destination,
    batch_size: usize,
    sender: mpsc::Sender<TriggerId>,
}

impl TriggerQueuePoller {
    pub fn new(
        store: Arc<dyn CheckerStore>,
        destination: Destination,
        batch_size: usize,
        sender: mpsc::Sender<TriggerId>,
    ) -> Self {
        Self {
            store,
            destination,
            batch_size,
            sender,
        }
    }

    async fn fetch(&self) -> Result<Vec<TriggerId>, StorageError> {
        match self.destination {
            Destination::Local => self.store.get_local_triggers_to_check(self.batch_size).await,
            Destination::Remote => {
                self.store
                    .get_remote_triggers_to_check(self.batch_size)
                    .await
            }
        }
    }

    pub async fn run(self, token: CancellationToken) -> Result<(), CheckerError> {
        info!(
            destination = %self.destination,
            batch_size = self.batch_size,
            "Starting triggers to check poller"
        );
        let mut fetch_delay = Duration::ZERO;

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = sleep(fetch_delay) => {}
            }

            fetch_delay = match self.fetch().await {
                Err(e) => {
                    warn!(destination = %self.destination, error = %e, "Failed to fetch triggers to check");
                    EMPTY_FETCH_DELAY
                }
                Ok(trigger_ids) if trigger_ids.is_empty() => EMPTY_FETCH_DELAY,
                Ok(trigger_ids) => {
                    debug!(destination = %self.destination, fetched = trigger_ids.len(), "Fetched triggers to check");
                    for trigger_id in trigger_ids {
                        tokio::select! {
                            biased;
                            _ = token.cancelled() => return Ok(()),
                            sent = self.sender.send(trigger_id) => {
                                if sent.is_err() {
                                    return Ok(());
                                }
                            }
                        }
                    }
                    Duration::ZERO
                }
            };
        }

        info!(destination = %self.destination, "Triggers to check poller stopped");
        Ok(())
    }
}

/// One worker's view of the pool: receives IDs and evaluates them under the check lock
pub struct TriggerHandler {
    store: Arc<dyn CheckerStore>,
    checker: Arc<dyn TriggerChecker>,
    destination: Destination,
    triggers: SharedReceiver<TriggerId>,
}

impl TriggerHandler {
    pub fn new(
        store: Arc<dyn CheckerStore>,
        checker: Arc<dyn TriggerChecker>,
        destination: Destination,
        triggers: SharedReceiver<TriggerId>,
    ) -> Self {
        Self {
            store,
            checker,
            destination,
            triggers,
        }
    }

    /// Worker loop; run by every task of the pool on the same handler
    pub async fn run(&self, token: CancellationToken) -> Result<(), CheckerError> {
        loop {
            let trigger_id = tokio::select! {
                biased;
                _ = token.cancelled() => return Ok(()),
                trigger_id = self.next_trigger() => match trigger_id {
                    Some(trigger_id) => trigger_id,
                    None => return Ok(()),
                },
            };

            if let Err(e) = self.handle_trigger(&trigger_id).await {
                telemetry::record_trigger_handle_error(self.destination);
                error!(
                    destination = %self.destination,
                    trigger_id = %trigger_id,
                    error = %e,
                    "Failed to handle trigger"
                );
            }
        }
    }

    async fn next_trigger(&self) -> Option<TriggerId> {
        self.triggers.lock().await.recv().await
    }

    /// Check one trigger; returns `false` when another checker holds its lock
    pub async fn handle_trigger(&self, trigger_id: &str) -> Result<bool, CheckError> {
        if !self.store.set_trigger_check_lock(trigger_id).await? {
            debug!(trigger_id = %trigger_id, "Trigger is being checked elsewhere");
            return Ok(false);
        }

        let started_at = Instant::now();
        let outcome = AssertUnwindSafe(self.checker.check(trigger_id))
            .catch_unwind()
            .await;
        telemetry::record_trigger_check_time(self.destination, started_at.elapsed());

        if let Err(e) = self.store.delete_trigger_check_lock(trigger_id).await {
            warn!(trigger_id = %trigger_id, error = %e, "Failed to release trigger check lock");
        }

        match outcome {
            Ok(result) => result.map(|()| true),
            Err(payload) => Err(CheckError::Panicked(panic_message(payload.as_ref()))),
        }
    }
}
