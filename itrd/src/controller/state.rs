//! Mutable state of a single test run.
//!
//! `RunState` is owned by exactly one run task. The submission throttler
//! reports to it over a channel and the polling loop applies one
//! observation per tick; nothing else touches it.

use chrono::{DateTime, Utc};
use itr_common::{
    JobInfo, JobPhase, JobRequest, ProgressEvent, ProgressRecord, RunConfig, RunSnapshot,
    RunStatus, ScopeId,
};
use serde::Serialize;
use std::collections::HashSet;

/// What the webhook pipeline hands to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    /// Already sanitized branch token.
    pub branch: String,
    pub commit: String,
    /// Final, deduplicated test list in submission order.
    pub tests: Vec<String>,
}

/// Per-tick histogram of job phases.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PhaseCounts {
    pub succeeded: usize,
    pub pending: usize,
    pub failed: usize,
    pub running: usize,
}

impl PhaseCounts {
    pub fn tally(jobs: &[JobInfo]) -> Self {
        let mut counts = Self::default();
        for job in jobs {
            match job.phase {
                JobPhase::Succeeded => counts.succeeded += 1,
                JobPhase::Pending => counts.pending += 1,
                JobPhase::Failed => counts.failed += 1,
                JobPhase::Running => counts.running += 1,
            }
        }
        counts
    }

    pub fn completed(&self) -> usize {
        self.succeeded + self.failed
    }

    pub fn remaining(&self) -> usize {
        self.running + self.pending
    }
}

/// Result of applying one job listing to the run.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub counts: PhaseCounts,
    pub num_pods: usize,
    /// Failed jobs seen for the first time this tick.
    pub new_failures: Vec<String>,
    pub progress: ProgressRecord,
}

/// What the polling loop should do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Continue,
    Success,
    Stalled,
}

/// Share of `total`, in percent. An empty run reports 0.
pub fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 / total as f64 * 100.0
    }
}

#[derive(Debug)]
pub struct RunState {
    scope: ScopeId,
    branch: String,
    commit: String,
    tests: Vec<String>,
    submitted: usize,
    submission_failures: usize,
    failed: HashSet<String>,
    failed_order: Vec<String>,
    running: Vec<String>,
    num_nodes: usize,
    poll_count: u32,
    started_at: DateTime<Utc>,
    status: RunStatus,
}

impl RunState {
    pub fn new(request: RunRequest, started_at: DateTime<Utc>) -> Self {
        Self {
            scope: ScopeId::new(&request.branch, &request.commit),
            branch: request.branch,
            commit: request.commit,
            tests: request.tests,
            submitted: 0,
            submission_failures: 0,
            failed: HashSet::new(),
            failed_order: Vec::new(),
            running: Vec::new(),
            num_nodes: 0,
            poll_count: 0,
            started_at,
            status: RunStatus::Created,
        }
    }

    pub fn scope(&self) -> &ScopeId {
        &self.scope
    }

    pub fn total(&self) -> usize {
        self.tests.len()
    }

    pub fn submitted(&self) -> usize {
        self.submitted
    }

    pub fn poll_count(&self) -> u32 {
        self.poll_count
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn set_status(&mut self, status: RunStatus) {
        self.status = status;
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Failed job names in the order they were first observed.
    pub fn failed_jobs(&self) -> &[String] {
        &self.failed_order
    }

    /// Jobs that were running in the most recent successful listing.
    pub fn running_jobs(&self) -> &[String] {
        &self.running
    }

    /// One submission request per test, in order.
    pub fn job_requests(&self) -> Vec<JobRequest> {
        self.tests
            .iter()
            .map(|test| JobRequest {
                scope: self.scope.clone(),
                branch: self.branch.clone(),
                commit: self.commit.clone(),
                test: test.clone(),
                total_tests: self.total(),
            })
            .collect()
    }

    /// Count a finished submission attempt. Attempts beyond `total` are
    /// ignored and reported as `false`.
    pub fn record_submission(&mut self, succeeded: bool) -> bool {
        if self.submitted >= self.total() {
            return false;
        }
        self.submitted += 1;
        if !succeeded {
            self.submission_failures += 1;
        }
        true
    }

    pub fn submission_complete(&self) -> bool {
        self.submitted >= self.total()
    }

    /// Apply one job listing.
    ///
    /// Newly failed names are inserted into the failed set here, before any
    /// log collection for them is started, so a later tick that observes the
    /// same job never reports it again.
    pub fn observe(&mut self, num_nodes: usize, jobs: &[JobInfo], now: DateTime<Utc>) -> TickReport {
        self.num_nodes = num_nodes;
        let counts = PhaseCounts::tally(jobs);

        let mut new_failures = Vec::new();
        for job in jobs.iter().filter(|job| job.phase == JobPhase::Failed) {
            if self.failed.insert(job.name.clone()) {
                self.failed_order.push(job.name.clone());
                new_failures.push(job.name.clone());
            }
        }

        self.running = jobs
            .iter()
            .filter(|job| job.phase == JobPhase::Running)
            .map(|job| job.name.clone())
            .collect();

        let total = self.total();
        let progress = self.record(
            ProgressEvent::Progress,
            jobs.len(),
            num_nodes,
            percent(counts.completed(), total),
            counts.completed(),
            percent(counts.remaining(), total),
            counts.remaining(),
            now,
        );

        TickReport {
            counts,
            num_pods: jobs.len(),
            new_failures,
            progress,
        }
    }

    /// Close a polling tick and evaluate termination.
    ///
    /// `observed_jobs` is `None` when this tick's listing failed; such a tick
    /// still counts toward the stall threshold but can never be a success.
    pub fn complete_tick(&mut self, observed_jobs: Option<usize>, config: &RunConfig) -> Decision {
        self.poll_count += 1;
        if self.poll_count > config.success_after_polls && observed_jobs == Some(0) {
            Decision::Success
        } else if self.poll_count >= config.stall_after_polls {
            Decision::Stalled
        } else {
            Decision::Continue
        }
    }

    /// `startStop` record emitted when the scope comes up.
    pub fn start_record(&self, num_nodes: usize, now: DateTime<Utc>) -> ProgressRecord {
        let total = self.total();
        self.record(ProgressEvent::StartStop, 0, num_nodes, 0.0, 0, 100.0, total, now)
    }

    /// `startStop` record emitted when the run ends.
    pub fn final_record(&self, now: DateTime<Utc>) -> ProgressRecord {
        let total = self.total();
        self.record(ProgressEvent::StartStop, 0, self.num_nodes, 100.0, total, 0.0, 0, now)
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        event: ProgressEvent,
        num_pods: usize,
        num_nodes: usize,
        complete_percent: f64,
        completed: usize,
        remaining_percent: f64,
        remaining: usize,
        now: DateTime<Utc>,
    ) -> ProgressRecord {
        ProgressRecord {
            branch: self.branch.clone(),
            commit: self.commit.clone(),
            event,
            total_tests: self.total(),
            num_pods,
            num_nodes,
            complete_percent,
            completed,
            remaining_percent,
            remaining,
            recorded_at: now,
        }
    }

    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            scope: self.scope.clone(),
            branch: self.branch.clone(),
            commit: self.commit.clone(),
            total: self.total(),
            submitted: self.submitted,
            submission_failures: self.submission_failures,
            poll_count: self.poll_count,
            failed_jobs: self.failed_order.clone(),
            status: self.status,
            started_at: self.started_at,
        }
    }
}
