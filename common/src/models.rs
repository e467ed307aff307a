use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Identifier of an alert rule
pub type TriggerId = String;

// ============================================================================
// Metric events
// ============================================================================

/// Notification that new data arrived for a metric pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricEvent {
    pub pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,
}

impl MetricEvent {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            metric: None,
        }
    }
}

/// Parameters for draining the metric-event source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeMetricEventsParams {
    pub batch_size: i64,
    pub delay: Duration,
}

// ============================================================================
// Check destinations
// ============================================================================

/// Which to-check queue a trigger is scheduled into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    Local,
    Remote,
}

impl Destination {
    /// Label value used on emitted metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Destination::Local => "local",
            Destination::Remote => "remote",
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_event_deserializes_without_metric() {
        let event: MetricEvent = serde_json::from_str(r#"{"pattern":"cpu.*.load"}"#).unwrap();
        assert_eq!(event, MetricEvent::new("cpu.*.load"));
    }

    #[test]
    fn test_metric_event_keeps_metric_name() {
        let event: MetricEvent =
            serde_json::from_str(r#"{"pattern":"cpu.*","metric":"cpu.host1"}"#).unwrap();
        assert_eq!(event.metric.as_deref(), Some("cpu.host1"));
    }

    #[test]
    fn test_destination_labels() {
        assert_eq!(Destination::Local.to_string(), "local");
        assert_eq!(Destination::Remote.as_str(), "remote");
    }
}
