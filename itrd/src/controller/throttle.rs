//! Fixed-cadence job submission.

use itr_common::{ClusterClient, ClusterError, JobRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, warn};

/// Outcome of one submission attempt, sent back to the run task.
#[derive(Debug)]
pub struct SubmissionReport {
    pub test: String,
    pub result: Result<(), ClusterError>,
}

/// Submit every job, one per `cadence`, starting immediately.
///
/// Each request is issued on its own task so a slow API call never delays
/// the next slot. Failures are reported and skipped; nothing is retried.
/// Returns once every attempt has completed.
pub async fn submit_all(
    cluster: Arc<dyn ClusterClient>,
    jobs: Vec<JobRequest>,
    cadence: Duration,
    reports: mpsc::UnboundedSender<SubmissionReport>,
) {
    let total = jobs.len();
    let mut ticker = interval(cadence);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut in_flight = JoinSet::new();

    for job in jobs {
        ticker.tick().await;
        let cluster = cluster.clone();
        let reports = reports.clone();
        in_flight.spawn(async move {
            let result = cluster.submit_job(&job).await;
            let _ = reports.send(SubmissionReport {
                test: job.test,
                result,
            });
        });
        while let Some(joined) = in_flight.try_join_next() {
            if let Err(e) = joined {
                warn!("Submission task ended abnormally: {}", e);
            }
        }
    }

    while let Some(joined) = in_flight.join_next().await {
        if let Err(e) = joined {
            warn!("Submission task ended abnormally: {}", e);
        }
    }
    debug!(total, "All submissions issued");
}
