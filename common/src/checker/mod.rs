// Trigger checker: metric-event intake, admission, queue polling and worker pools

pub mod admission;
pub mod consumer;
pub mod engine;
pub mod lazy;
pub mod monitor;
pub mod queue;
pub mod scanner;

#[cfg(test)]
pub(crate) mod test_support;

pub use admission::AdmissionGate;
pub use consumer::{MetricEventConsumer, MetricEventPump, Watermark};
pub use engine::{Checker, CheckerConfig, MAX_PARALLEL_CHECKS_LIMIT};
pub use lazy::{LazyTriggers, LazyTriggersRefresher};
pub use queue::{LogTriggerChecker, TriggerChecker, TriggerHandler, TriggerQueuePoller};
pub use scanner::{NoDataScanner, RemoteScanner};
