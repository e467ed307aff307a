// Periodic full scans: NODATA rechecks of local triggers and remote trigger rechecks

use crate::checker::admission::AdmissionGate;
use crate::checker::consumer::Watermark;
use crate::errors::{CheckerError, RemoteScanError, StorageError};
use crate::models::Destination;
use crate::remote::RemoteSource;
use crate::storage::CheckerStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Schedules every local trigger for a NODATA recheck while metrics keep flowing
pub struct NoDataScanner {
    store: Arc<dyn CheckerStore>,
    gate: Arc<AdmissionGate>,
    watermark: Arc<Watermark>,
    stop_checking_interval: Duration,
    period: Duration,
}

impl NoDataScanner {
    pub fn new(
        store: Arc<dyn CheckerStore>,
        gate: Arc<AdmissionGate>,
        watermark: Arc<Watermark>,
        stop_checking_interval: Duration,
        period: Duration,
    ) -> Self {
        Self {
            store,
            gate,
            watermark,
            stop_checking_interval,
            period,
        }
    }

    /// One scan; returns how many triggers were admitted
    ///
    /// Skipped while no metric event arrived within the stop-checking interval, so a
    /// stalled ingestion does not flood every trigger with NODATA.
    #[instrument(skip(self))]
    pub async fn check_nodata(&self) -> Result<usize, StorageError> {
        let silence = self.watermark.age_seconds();
        if silence > self.stop_checking_interval.as_secs() as i64 {
            info!(
                silence_seconds = silence,
                "Checking NODATA disabled, no metrics arrived recently"
            );
            return Ok(0);
        }

        let trigger_ids = self.store.get_local_trigger_ids().await?;
        let admitted = self.gate.admit(&trigger_ids, Destination::Local).await;
        info!(triggers = trigger_ids.len(), admitted = admitted.len(), "Checking NODATA");
        Ok(admitted.len())
    }

    pub async fn run(self, token: CancellationToken) -> Result<(), CheckerError> {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        loop {
            tokio::select! {
                _ = token.cancelled() => return Ok(()),
                _ = ticker.tick() => {
                    if let Err(e) = self.check_nodata().await {
                        error!(error = %e, "NODATA check failed");
                    }
                }
            }
        }
    }
}

/// Schedules remote triggers while the remote source answers
pub struct RemoteScanner {
    store: Arc<dyn CheckerStore>,
    gate: Arc<AdmissionGate>,
    remote: Arc<dyn RemoteSource>,
    period: Duration,
}

impl RemoteScanner {
    pub fn new(
        store: Arc<dyn CheckerStore>,
        gate: Arc<AdmissionGate>,
        remote: Arc<dyn RemoteSource>,
        period: Duration,
    ) -> Self {
        Self {
            store,
            gate,
            remote,
            period,
        }
    }

    /// One scan; returns how many triggers were admitted
    #[instrument(skip(self))]
    pub async fn check_remote(&self) -> Result<usize, RemoteScanError> {
        if !self.remote.is_available().await? {
            warn!("Remote API is unavailable, skipping remote triggers");
            return Ok(0);
        }

        let trigger_ids = self.store.get_remote_trigger_ids().await?;
        let admitted = self.gate.admit(&trigger_ids, Destination::Remote).await;
        Ok(admitted.len())
    }

    pub async fn run(self, token: CancellationToken) -> Result<(), CheckerError> {
        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        loop {
            tokio::select! {
                _ = token.cancelled() => return Ok(()),
                _ = ticker.tick() => {
                    if let Err(e) = self.check_remote().await {
                        error!(error = %e, "Remote triggers check failed");
                    }
                }
            }
        }
    }
}
