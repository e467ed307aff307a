// Telemetry module for structured logging, metrics, and tracing

use crate::models::Destination;
use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    trace::{RandomIdGenerator, Sampler, TracerProvider},
    Resource,
};
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const METRIC_EVENTS_HANDLE_SECONDS: &str = "checker_metric_events_handle_seconds";
pub const METRIC_EVENTS_CHANNEL_LEN: &str = "checker_metric_events_channel_len";
pub const TRIGGERS_TO_CHECK: &str = "checker_triggers_to_check";
pub const TRIGGER_CHECK_SECONDS: &str = "checker_trigger_check_seconds";
pub const TRIGGER_HANDLE_ERRORS_TOTAL: &str = "checker_trigger_handle_errors_total";
pub const UNUSED_TRIGGERS: &str = "checker_unused_triggers";

/// Initialize structured logging with JSON formatting and trace context
///
/// This function sets up the tracing subscriber with:
/// - JSON formatting for structured logs
/// - Log levels from configuration or environment
/// - Optional OpenTelemetry integration
#[tracing::instrument(skip_all)]
pub fn init_logging(log_level: &str, tracing_endpoint: Option<&str>) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(env_filter);

    let registry = tracing_subscriber::registry().with(json_layer);

    if let Some(endpoint) = tracing_endpoint {
        let tracer = init_tracer(endpoint)?;
        let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        registry
            .with(telemetry_layer)
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    } else {
        registry
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;
    }

    tracing::info!(
        log_level = log_level,
        tracing_endpoint = tracing_endpoint,
        "Structured logging initialized with JSON formatting"
    );

    Ok(())
}

/// Initialize OpenTelemetry tracer with OTLP exporter
#[tracing::instrument(skip_all)]
fn init_tracer(endpoint: &str) -> Result<opentelemetry_sdk::trace::Tracer> {
    use opentelemetry_sdk::runtime::Tokio;

    let exporter = opentelemetry_otlp::new_exporter()
        .tonic()
        .with_endpoint(endpoint)
        .build_span_exporter()
        .map_err(|e| anyhow::anyhow!("Failed to build span exporter: {}", e))?;

    let tracer_provider = TracerProvider::builder()
        .with_batch_exporter(exporter, Tokio)
        .with_config(
            opentelemetry_sdk::trace::Config::default()
                .with_sampler(Sampler::AlwaysOn)
                .with_id_generator(RandomIdGenerator::default())
                .with_resource(Resource::new(vec![
                    KeyValue::new("service.name", "trigger-checker"),
                    KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
                ])),
        )
        .build();

    global::set_tracer_provider(tracer_provider.clone());

    let tracer = tracer_provider.tracer("trigger-checker");

    tracing::info!(
        endpoint = endpoint,
        "OpenTelemetry tracer initialized with OTLP exporter"
    );

    Ok(tracer)
}

/// Shutdown OpenTelemetry tracer provider, flushing remaining spans
pub fn shutdown_tracer() {
    global::shutdown_tracer_provider();
}

/// Initialize Prometheus metrics exporter and describe every checker series
#[tracing::instrument(skip_all)]
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics port: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_histogram!(
        METRIC_EVENTS_HANDLE_SECONDS,
        "Time spent resolving one admitted metric event"
    );
    describe_gauge!(
        METRIC_EVENTS_CHANNEL_LEN,
        "Metric events waiting in the in-process channel"
    );
    describe_gauge!(TRIGGERS_TO_CHECK, "Triggers waiting in the to-check queue");
    describe_histogram!(TRIGGER_CHECK_SECONDS, "Duration of one trigger check");
    describe_counter!(
        TRIGGER_HANDLE_ERRORS_TOTAL,
        "Trigger checks that failed or panicked"
    );
    describe_gauge!(UNUSED_TRIGGERS, "Triggers currently scheduled lazily");

    tracing::info!(
        metrics_port = metrics_port,
        metrics_endpoint = format!("http://0.0.0.0:{}/metrics", metrics_port),
        "Prometheus metrics exporter initialized"
    );

    Ok(())
}

#[inline]
pub fn record_metric_event_handle_time(elapsed: Duration) {
    histogram!(METRIC_EVENTS_HANDLE_SECONDS).record(elapsed.as_secs_f64());
}

#[inline]
pub fn update_metric_events_channel_len(len: usize) {
    gauge!(METRIC_EVENTS_CHANNEL_LEN).set(len as f64);
}

#[inline]
pub fn update_triggers_to_check(destination: Destination, count: i64) {
    gauge!(TRIGGERS_TO_CHECK, "source" => destination.as_str()).set(count as f64);
}

#[inline]
pub fn record_trigger_check_time(destination: Destination, elapsed: Duration) {
    histogram!(TRIGGER_CHECK_SECONDS, "source" => destination.as_str())
        .record(elapsed.as_secs_f64());
}

#[inline]
pub fn record_trigger_handle_error(destination: Destination) {
    counter!(TRIGGER_HANDLE_ERRORS_TOTAL, "source" => destination.as_str()).increment(1);
}

#[inline]
pub fn update_unused_triggers(count: usize) {
    gauge!(UNUSED_TRIGGERS).set(count as f64);
}
