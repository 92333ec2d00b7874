//! Prometheus self-metrics for the daemon.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `itr_runs_started_total` | Counter | `outcome` |
//! | `itr_runs_finished_total` | Counter | `status` |
//! | `itr_runs_active` | Gauge | |
//! | `itr_jobs_submitted_total` | Counter | `result` |
//! | `itr_polls_total` | Counter | |
//! | `itr_failed_jobs_total` | Counter | |
//! | `itr_api_failures_total` | Counter | `call` |
//! | `itr_checkout_failures_total` | Counter | |

use itr_common::RunStatus;
use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref RUNS_STARTED: IntCounterVec = IntCounterVec::new(
        Opts::new("itr_runs_started_total", "Test runs by provisioning outcome"),
        &["outcome"]
    )
    .expect("metric definition is valid");
    pub static ref RUNS_FINISHED: IntCounterVec = IntCounterVec::new(
        Opts::new("itr_runs_finished_total", "Test runs by terminal status"),
        &["status"]
    )
    .expect("metric definition is valid");
    pub static ref RUNS_ACTIVE: IntGauge =
        IntGauge::new("itr_runs_active", "Runs with a live execution scope")
            .expect("metric definition is valid");
    pub static ref JOBS_SUBMITTED: IntCounterVec = IntCounterVec::new(
        Opts::new("itr_jobs_submitted_total", "Job submission attempts by result"),
        &["result"]
    )
    .expect("metric definition is valid");
    pub static ref POLLS: IntCounter =
        IntCounter::new("itr_polls_total", "Polling ticks across all runs")
            .expect("metric definition is valid");
    pub static ref FAILED_JOBS: IntCounter =
        IntCounter::new("itr_failed_jobs_total", "Distinct failed jobs observed")
            .expect("metric definition is valid");
    pub static ref API_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("itr_api_failures_total", "Failed collaborator calls by call name"),
        &["call"]
    )
    .expect("metric definition is valid");
    pub static ref CHECKOUT_FAILURES: IntCounter = IntCounter::new(
        "itr_checkout_failures_total",
        "Webhook triggers whose checkout or discovery failed"
    )
    .expect("metric definition is valid");
}

/// Register every metric with [`REGISTRY`]. Call once at startup.
pub fn register_metrics() -> Result<(), prometheus::Error> {
    REGISTRY.register(Box::new(RUNS_STARTED.clone()))?;
    REGISTRY.register(Box::new(RUNS_FINISHED.clone()))?;
    REGISTRY.register(Box::new(RUNS_ACTIVE.clone()))?;
    REGISTRY.register(Box::new(JOBS_SUBMITTED.clone()))?;
    REGISTRY.register(Box::new(POLLS.clone()))?;
    REGISTRY.register(Box::new(FAILED_JOBS.clone()))?;
    REGISTRY.register(Box::new(API_FAILURES.clone()))?;
    REGISTRY.register(Box::new(CHECKOUT_FAILURES.clone()))?;
    Ok(())
}

/// Encode the registry in the Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

pub fn record_run_started(provisioned: bool) {
    let outcome = if provisioned { "provisioned" } else { "failed_to_start" };
    RUNS_STARTED.with_label_values(&[outcome]).inc();
}

pub fn record_run_finished(status: RunStatus) {
    RUNS_FINISHED
        .with_label_values(&[status.to_string().as_str()])
        .inc();
}

pub fn record_submission(ok: bool) {
    let result = if ok { "ok" } else { "error" };
    JOBS_SUBMITTED.with_label_values(&[result]).inc();
}

pub fn record_api_failure(call: &str) {
    API_FAILURES.with_label_values(&[call]).inc();
}

/// Keeps `itr_runs_active` incremented while alive.
pub struct ActiveRunGuard(());

impl ActiveRunGuard {
    pub fn new() -> Self {
        RUNS_ACTIVE.inc();
        Self(())
    }
}

impl Drop for ActiveRunGuard {
    fn drop(&mut self) {
        RUNS_ACTIVE.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_output_contains_registered_families() {
        let _ = register_metrics();
        record_submission(true);
        record_api_failure("list_nodes");

        let text = encode_metrics().unwrap();
        assert!(text.contains("itr_jobs_submitted_total"));
        assert!(text.contains("itr_api_failures_total{call=\"list_nodes\"}"));
    }

    #[test]
    fn active_guard_restores_gauge() {
        {
            let _guard = ActiveRunGuard::new();
            assert!(RUNS_ACTIVE.get() >= 1);
        }
        // Controller tests may hold guards concurrently.
        assert!(RUNS_ACTIVE.get() >= 0);
    }
}
