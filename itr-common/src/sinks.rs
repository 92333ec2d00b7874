//! Progress metrics and human notification sinks.

use async_trait::async_trait;

use crate::errors::SinkError;
use crate::types::ProgressRecord;

/// Accepts timestamped run progress records.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn record(&self, record: &ProgressRecord) -> Result<(), SinkError>;
}

/// Accepts short human-readable messages.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str) -> Result<(), SinkError>;
}
