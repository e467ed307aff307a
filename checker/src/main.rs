// Trigger checker binary entry point

use anyhow::{Context, Result};
use common::checker::{Checker, CheckerConfig, LogTriggerChecker, TriggerChecker};
use common::config::Settings;
use common::db::RedisConnection;
use common::remote::RemoteSourceProvider;
use common::storage::{CheckerStore, RedisStore};
use common::telemetry;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::load().context("Failed to load configuration")?;
    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    telemetry::init_logging(
        &settings.observability.log_level,
        settings.observability.tracing_endpoint.as_deref(),
    )?;
    telemetry::init_metrics(settings.observability.metrics_port)?;

    info!(
        redis_url = %settings.redis.url,
        remote_enabled = settings.remote.enabled,
        "Starting trigger checker"
    );

    let redis = RedisConnection::connect(&settings.redis).await.map_err(|e| {
        error!(error = %e, "Failed to connect to Redis");
        e
    })?;
    let store = Arc::new(RedisStore::new(redis)) as Arc<dyn CheckerStore>;

    let remote_provider = RemoteSourceProvider::from_settings(&settings.remote).map_err(|e| {
        error!(error = %e, "Failed to initialize remote source");
        e
    })?;
    let trigger_checker = Arc::new(LogTriggerChecker) as Arc<dyn TriggerChecker>;

    let config = CheckerConfig::from_settings(&settings.checker, &settings.remote);
    let checker = Checker::new(config, store, trigger_checker, remote_provider);

    checker.start().map_err(|e| {
        error!(error = %e, "Failed to start trigger checker");
        e
    })?;

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl+C")?;
            info!("Received Ctrl+C signal, initiating graceful shutdown");
        }
        _ = checker.dying() => {
            error!("A checker task failed, shutting down");
        }
    }

    let result = checker.stop().await;
    if let Err(e) = &result {
        error!(error = %e, "Trigger checker stopped with error");
    }
    info!(last_data = checker.last_data(), "Trigger checker stopped");

    telemetry::shutdown_tracer();
    result.map_err(Into::into)
}
