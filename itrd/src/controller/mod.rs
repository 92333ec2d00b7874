//! Run controller: drives one test run from scope provisioning to teardown.
//!
//! Each run is a single tokio task that owns its [`RunState`]. Two timers
//! feed it:
//! - the submission throttler (its own task, reporting over a channel), and
//! - the polling interval, handled inline by the run task.
//!
//! Side effects that must not block the loop (metrics writes, notifications,
//! log collection) are spawned into a per-run `JoinSet`. The set is drained
//! before the scope is deleted, so deletion is always the last call a run
//! makes.

mod report;
mod state;
mod throttle;

#[cfg(test)]
mod tests;

pub use state::RunRequest;

use chrono::Utc;
use itr_common::{
    ClusterClient, MetricsSink, Notifier, ProgressRecord, RunConfig, RunError, RunSnapshot,
    RunStatus, ScopeId,
};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, error, info, warn};

use crate::logstore::LogStore;
use crate::metrics;
use report::Summary;
use state::{Decision, RunState};
use throttle::SubmissionReport;

/// Why a job's logs are being collected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogReason {
    Failed,
    Stalled,
}

/// Final result of a run task.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub snapshot: RunSnapshot,
    /// Set when the run could not start.
    pub error: Option<RunError>,
}

impl RunOutcome {
    fn log(&self) {
        let snapshot = &self.snapshot;
        match &self.error {
            Some(e) => info!(
                scope = %snapshot.scope,
                status = ?snapshot.status,
                "Run ended before any job was submitted: {}",
                e
            ),
            None => info!(
                scope = %snapshot.scope,
                status = ?snapshot.status,
                polls = snapshot.poll_count,
                submitted = snapshot.submitted,
                "Run ended"
            ),
        }
    }
}

/// Handle to a run in progress. Dropping it does not stop the run.
#[derive(Debug)]
pub struct RunHandle {
    scope: ScopeId,
    snapshot: watch::Receiver<RunSnapshot>,
    task: JoinHandle<RunOutcome>,
}

impl RunHandle {
    pub fn scope(&self) -> &ScopeId {
        &self.scope
    }

    /// Latest published state of the run.
    pub fn snapshot(&self) -> RunSnapshot {
        self.snapshot.borrow().clone()
    }

    #[cfg(test)]
    pub fn subscribe(&self) -> watch::Receiver<RunSnapshot> {
        self.snapshot.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the run to reach a terminal state.
    #[cfg(test)]
    pub async fn wait(self) -> Result<RunOutcome, tokio::task::JoinError> {
        self.task.await
    }
}

/// Aborts the wrapped task when dropped.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

struct Collaborators {
    cluster: Arc<dyn ClusterClient>,
    metrics: Arc<dyn MetricsSink>,
    notifier: Arc<dyn Notifier>,
    logs: LogStore,
    config: RunConfig,
    dashboard_url: Option<String>,
}

/// Starts runs. Cheap to clone; every run gets its own task and state.
#[derive(Clone)]
pub struct RunController {
    inner: Arc<Collaborators>,
}

impl RunController {
    /// `dashboard_url` is linked from the "run started" notification.
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        metrics: Arc<dyn MetricsSink>,
        notifier: Arc<dyn Notifier>,
        logs: LogStore,
        config: RunConfig,
        dashboard_url: Option<String>,
    ) -> Self {
        Self {
            inner: Arc::new(Collaborators {
                cluster,
                metrics,
                notifier,
                logs,
                config,
                dashboard_url,
            }),
        }
    }

    /// Begin a run in the background and return immediately.
    pub fn start(&self, request: RunRequest) -> RunHandle {
        let state = RunState::new(request, Utc::now());
        let scope = state.scope().clone();
        let (snapshot_tx, snapshot_rx) = watch::channel(state.snapshot());
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            let outcome = inner.drive(state, snapshot_tx).await;
            outcome.log();
            outcome
        });
        RunHandle {
            scope,
            snapshot: snapshot_rx,
            task,
        }
    }
}

impl Collaborators {
    async fn drive(
        self: Arc<Self>,
        mut state: RunState,
        snapshot_tx: watch::Sender<RunSnapshot>,
    ) -> RunOutcome {
        let scope = state.scope().clone();
        info!(scope = %scope, total = state.total(), "Test {} starting", scope);

        if let Err(source) = self.cluster.create_scope(&scope).await {
            let err = RunError::Provisioning {
                scope: scope.to_string(),
                source,
            };
            error!(scope = %scope, "Run failed to start: {}", err);
            metrics::record_run_started(false);
            metrics::record_run_finished(RunStatus::FailedToStart);
            state.set_status(RunStatus::FailedToStart);
            let _ = snapshot_tx.send(state.snapshot());
            return RunOutcome {
                snapshot: state.snapshot(),
                error: Some(err),
            };
        }
        metrics::record_run_started(true);
        let _active = metrics::ActiveRunGuard::new();

        let mut effects = JoinSet::new();
        self.announce(&mut effects, &state);
        if let Err(e) = self.logs.ensure_scope(scope.as_str()).await {
            warn!(scope = %scope, "Failed to create log directory: {}", e);
        }

        state.set_status(if state.submission_complete() {
            RunStatus::Polling
        } else {
            RunStatus::SubmittingJobs
        });
        let _ = snapshot_tx.send(state.snapshot());
        info!(scope = %scope, "Number queued: {}", state.total());

        let (report_tx, mut report_rx) = mpsc::unbounded_channel();
        let throttle = AbortOnDrop(tokio::spawn(throttle::submit_all(
            self.cluster.clone(),
            state.job_requests(),
            self.config.submit_interval(),
            report_tx,
        )));
        let mut reports_open = true;

        let period = self.config.poll_interval();
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let decision = loop {
            tokio::select! {
                report = report_rx.recv(), if reports_open => match report {
                    Some(report) => {
                        self.on_submission(&mut state, report);
                        let _ = snapshot_tx.send(state.snapshot());
                    }
                    None => reports_open = false,
                },
                _ = ticker.tick() => {
                    let decision = self.poll_tick(&mut state, &mut effects).await;
                    let _ = snapshot_tx.send(state.snapshot());
                    if decision != Decision::Continue {
                        break decision;
                    }
                }
                Some(joined) = effects.join_next(), if !effects.is_empty() => {
                    if let Err(e) = joined {
                        warn!(scope = %scope, "Side-effect task ended abnormally: {}", e);
                    }
                }
            }
        };
        drop(throttle);

        self.finish(&mut state, decision, &mut effects).await;
        let _ = snapshot_tx.send(state.snapshot());
        RunOutcome {
            snapshot: state.snapshot(),
            error: None,
        }
    }

    /// Node count, `startStop` record and "run started" message.
    fn announce(self: &Arc<Self>, effects: &mut JoinSet<()>, state: &RunState) {
        let this = self.clone();
        let scope = state.scope().clone();
        let record_template = state.start_record(0, Utc::now());
        effects.spawn(async move {
            let num_nodes = match this.cluster.list_nodes().await {
                Ok(nodes) => nodes.len(),
                Err(e) => {
                    warn!(scope = %scope, "{}", RunError::transient("list_nodes", e));
                    metrics::record_api_failure("list_nodes");
                    0
                }
            };
            let record = ProgressRecord {
                num_nodes,
                ..record_template
            };
            let message = report::run_started(&scope, this.dashboard_url.as_deref());
            tokio::join!(this.write_record(&record), this.send(&message));
        });
    }

    fn on_submission(&self, state: &mut RunState, report: SubmissionReport) {
        let ok = report.result.is_ok();
        if let Err(source) = report.result {
            let err = RunError::Submission {
                test: report.test.clone(),
                source,
            };
            warn!(scope = %state.scope(), "{}", err);
        }
        if !state.record_submission(ok) {
            return;
        }
        metrics::record_submission(ok);
        if state.submission_complete() {
            info!(scope = %state.scope(), "Number started: {}", state.submitted());
            if state.status() == RunStatus::SubmittingJobs {
                state.set_status(RunStatus::Polling);
            }
        }
    }

    async fn poll_tick(self: &Arc<Self>, state: &mut RunState, effects: &mut JoinSet<()>) -> Decision {
        let scope = state.scope().clone();

        // The node count rides along with the job listing; the tick never
        // waits for it past the listing.
        let nodes = self.cluster.list_nodes();
        let jobs = self.cluster.list_jobs(&scope);
        tokio::pin!(nodes, jobs);
        let mut num_nodes = None;
        let jobs = loop {
            tokio::select! {
                biased;
                listed = &mut nodes, if num_nodes.is_none() => {
                    num_nodes = Some(match listed {
                        Ok(nodes) => nodes.len(),
                        Err(e) => {
                            warn!(scope = %scope, "{}", RunError::transient("list_nodes", e));
                            metrics::record_api_failure("list_nodes");
                            0
                        }
                    });
                }
                listed = &mut jobs => break listed,
            }
        };
        let num_nodes = num_nodes.unwrap_or_else(|| {
            debug!(scope = %scope, "Node count not ready, reporting 0");
            0
        });
        metrics::POLLS.inc();

        let observed = match jobs {
            Ok(jobs) => {
                let report = state.observe(num_nodes, &jobs, Utc::now());
                for job in &report.new_failures {
                    metrics::FAILED_JOBS.inc();
                    self.collect_logs(effects, &scope, job, LogReason::Failed);
                }
                debug!(
                    scope = %scope,
                    pods = report.num_pods,
                    succeeded = report.counts.succeeded,
                    pending = report.counts.pending,
                    failed = report.counts.failed,
                    running = report.counts.running,
                    "Poll observed jobs"
                );
                let this = self.clone();
                let record = report.progress.clone();
                effects.spawn(async move { this.write_record(&record).await });
                Some(report.num_pods)
            }
            Err(e) => {
                warn!(scope = %scope, "{}", RunError::transient("list_jobs", e));
                metrics::record_api_failure("list_jobs");
                None
            }
        };

        let decision = state.complete_tick(observed, &self.config);
        debug!(scope = %scope, poll = state.poll_count(), ?decision, "Poll complete");
        decision
    }

    /// Terminal reporting, then scope deletion once every side effect is done.
    async fn finish(self: &Arc<Self>, state: &mut RunState, decision: Decision, effects: &mut JoinSet<()>) {
        let scope = state.scope().clone();
        let status = match decision {
            Decision::Stalled => RunStatus::CompletedStalled,
            _ => RunStatus::CompletedSuccess,
        };
        state.set_status(status);

        let this = self.clone();
        let record = state.final_record(Utc::now());
        let summary = Summary {
            scope: &scope,
            status,
            started_at: state.started_at(),
            finished_at: Utc::now(),
            total: state.total(),
            failed: state.failed_jobs(),
            stalled: state.running_jobs(),
        }
        .render();
        effects.spawn(async move {
            tokio::join!(this.write_record(&record), this.send(&summary));
        });

        if status == RunStatus::CompletedStalled {
            warn!(
                scope = %scope,
                polls = state.poll_count(),
                "Run stalled with {} running jobs",
                state.running_jobs().len()
            );
            for job in state.running_jobs() {
                self.collect_logs(effects, &scope, job, LogReason::Stalled);
            }
        }

        while let Some(joined) = effects.join_next().await {
            if let Err(e) = joined {
                warn!(scope = %scope, "Side-effect task ended abnormally: {}", e);
            }
        }

        match self.cluster.delete_scope(&scope).await {
            Ok(()) => info!(scope = %scope, "Test {} finished and cleaned up", scope),
            Err(e) => {
                warn!(scope = %scope, "{}", RunError::transient("delete_scope", e));
                metrics::record_api_failure("delete_scope");
            }
        }
        metrics::record_run_finished(status);
    }

    fn collect_logs(self: &Arc<Self>, effects: &mut JoinSet<()>, scope: &ScopeId, job: &str, reason: LogReason) {
        let this = self.clone();
        let scope = scope.clone();
        let job = job.to_string();
        effects.spawn(async move {
            let text = match this.cluster.job_logs(&scope, &job).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(scope = %scope, job = %job, "{}", RunError::transient("job_logs", e));
                    metrics::record_api_failure("job_logs");
                    return;
                }
            };
            if let Err(e) = this.logs.write(scope.as_str(), &job, &text).await {
                warn!(scope = %scope, job = %job, "Failed to persist job log: {}", e);
            }
            let location = this.logs.location(scope.as_str(), &job);
            let message = match reason {
                LogReason::Failed => report::job_failed(&job, &location),
                LogReason::Stalled => report::job_stalled(&job, &location),
            };
            this.send(&message).await;
        });
    }

    async fn write_record(&self, record: &ProgressRecord) {
        if let Err(e) = self.metrics.record(record).await {
            warn!(
                event = record.event.as_str(),
                "{}",
                RunError::transient("metrics_record", e)
            );
            metrics::record_api_failure("metrics_record");
        }
    }

    async fn send(&self, text: &str) {
        if let Err(e) = self.notifier.send(text).await {
            warn!("{}", RunError::transient("notify", e));
            metrics::record_api_failure("notify");
        }
    }
}
