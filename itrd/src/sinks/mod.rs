//! Progress metrics and notification sinks.
//!
//! Each sink has a network implementation and a log-only fallback used when
//! its endpoint is not configured.

mod influx;
mod slack;

pub use influx::InfluxSink;
pub use slack::SlackNotifier;

use async_trait::async_trait;
use itr_common::{MetricsSink, Notifier, ProgressRecord, SinkError};
use tracing::info;

/// Writes progress records to the log only.
pub struct LogMetricsSink;

#[async_trait]
impl MetricsSink for LogMetricsSink {
    async fn record(&self, record: &ProgressRecord) -> Result<(), SinkError> {
        info!(
            test_run = %record.test_run(),
            event = record.event.as_str(),
            total_tests = record.total_tests,
            pods = record.num_pods,
            nodes = record.num_nodes,
            completed = record.completed,
            remaining = record.remaining,
            "Progress {:.1}% complete, {:.1}% remaining",
            record.complete_percent,
            record.remaining_percent
        );
        Ok(())
    }
}

/// Writes notifications to the log only.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, text: &str) -> Result<(), SinkError> {
        info!(target: "itrd::notify", "{}", text);
        Ok(())
    }
}
