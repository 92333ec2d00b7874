//! InfluxDB 1.x line-protocol writer for run progress.

use async_trait::async_trait;
use itr_common::config::MetricsConfig;
use itr_common::{MetricsSink, ProgressRecord, SinkError};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

pub struct InfluxSink {
    write_url: String,
    measurement: String,
    credentials: Option<(String, Option<String>)>,
    client: Client,
}

impl InfluxSink {
    /// Build a sink for `url`. Credentials are sent when a username is set.
    pub fn new(url: &str, config: &MetricsConfig, timeout: Duration) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SinkError::Transport(e.to_string()))?;
        Ok(Self {
            write_url: format!(
                "{}/write?db={}&precision=ns",
                url.trim_end_matches('/'),
                urlencoding::encode(&config.database)
            ),
            measurement: config.measurement.clone(),
            credentials: config
                .username
                .clone()
                .map(|user| (user, config.password.clone())),
            client,
        })
    }

    pub fn write_url(&self) -> &str {
        &self.write_url
    }
}

#[async_trait]
impl MetricsSink for InfluxSink {
    async fn record(&self, record: &ProgressRecord) -> Result<(), SinkError> {
        let line = encode_line(&self.measurement, record)?;
        debug!(%line, "Writing progress point");

        let mut request = self.client.post(&self.write_url).body(line);
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, password.as_ref());
        }
        let response = request
            .send()
            .await
            .map_err(|e| SinkError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(SinkError::Status {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }
        Ok(())
    }
}

/// Encode one record as a line-protocol point with a nanosecond timestamp.
pub fn encode_line(measurement: &str, record: &ProgressRecord) -> Result<String, SinkError> {
    let timestamp = record
        .recorded_at
        .timestamp_nanos_opt()
        .ok_or_else(|| SinkError::Encode("timestamp out of range".to_string()))?;
    Ok(format!(
        "{},test_run={},git_branch={},git_commit={},event_name={} \
         total_tests={}i,total_pods={}i,total_nodes={}i,comp_perc={},comp={}i,remain_perc={},remain={}i {}",
        escape(measurement, false),
        escape(&record.test_run(), true),
        escape(&record.branch, true),
        escape(&record.commit, true),
        record.event.as_str(),
        record.total_tests,
        record.num_pods,
        record.num_nodes,
        float(record.complete_percent),
        record.completed,
        float(record.remaining_percent),
        record.remaining,
        timestamp
    ))
}

/// Measurements escape commas and spaces; tag values also escape `=`.
fn escape(raw: &str, tag: bool) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c == ',' || c == ' ' || (tag && c == '=') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Floats always carry a decimal point so Influx never types them as ints.
fn float(value: f64) -> String {
    let text = value.to_string();
    if text.contains(['.', 'e', 'E']) || !value.is_finite() {
        text
    } else {
        format!("{text}.0")
    }
}
