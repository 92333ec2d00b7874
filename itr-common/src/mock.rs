//! Scripted in-memory collaborators for deterministic tests.
//!
//! All mocks can share one [`CallLog`] so tests can assert on the global
//! order of cluster, metrics and notification calls.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

use crate::cluster::ClusterClient;
use crate::errors::{CheckoutError, ClusterError, SinkError};
use crate::sinks::{MetricsSink, Notifier};
use crate::source::SourceRepo;
use crate::types::{JobInfo, JobRequest, NodeInfo, ProgressEvent, ProgressRecord, ScopeId};

/// One observed collaborator call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateScope(String),
    DeleteScope(String),
    ListNodes,
    SubmitJob(String),
    ListJobs(String),
    JobLogs(String),
    Metric(ProgressEvent),
    Notify(String),
    Checkout(String),
    DiscoverTests,
}

/// Shared, ordered record of collaborator calls.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CallLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, call: Call) {
        self.calls.lock().expect("call log mutex poisoned").push(call);
    }

    /// Snapshot of every call so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("call log mutex poisoned").clone()
    }

    pub fn count(&self, predicate: impl Fn(&Call) -> bool) -> usize {
        self.calls
            .lock()
            .expect("call log mutex poisoned")
            .iter()
            .filter(|call| predicate(call))
            .count()
    }
}

type JobScript = dyn Fn(u32) -> Result<Vec<JobInfo>, ClusterError> + Send + Sync;

#[derive(Default)]
struct MockClusterState {
    create_error: Option<ClusterError>,
    failing_submissions: HashSet<String>,
    node_count: usize,
    nodes_fail: bool,
    nodes_delay: Option<Duration>,
    logs: HashMap<String, String>,
    submissions: Vec<(String, Instant)>,
    list_calls: u32,
}

/// Cluster whose job listings are produced by a script keyed on the
/// 1-based number of the `list_jobs` call.
pub struct MockCluster {
    log: CallLog,
    jobs: Box<JobScript>,
    state: Mutex<MockClusterState>,
}

impl MockCluster {
    /// A healthy cluster with two nodes and an always-empty scope.
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            jobs: Box::new(|_| Ok(Vec::new())),
            state: Mutex::new(MockClusterState {
                node_count: 2,
                ..Default::default()
            }),
        }
    }

    pub fn with_jobs(
        mut self,
        script: impl Fn(u32) -> Result<Vec<JobInfo>, ClusterError> + Send + Sync + 'static,
    ) -> Self {
        self.jobs = Box::new(script);
        self
    }

    pub fn failing_create(self, error: ClusterError) -> Self {
        self.lock().create_error = Some(error);
        self
    }

    pub fn failing_submission(self, test: &str) -> Self {
        self.lock().failing_submissions.insert(test.to_string());
        self
    }

    pub fn with_nodes(self, count: usize) -> Self {
        self.lock().node_count = count;
        self
    }

    pub fn failing_nodes(self) -> Self {
        self.lock().nodes_fail = true;
        self
    }

    /// Make every node listing take `delay` before answering.
    pub fn slow_nodes(self, delay: Duration) -> Self {
        self.lock().nodes_delay = Some(delay);
        self
    }

    pub fn with_log(self, job: &str, text: &str) -> Self {
        self.lock().logs.insert(job.to_string(), text.to_string());
        self
    }

    /// Every submission attempt with the (tokio) instant it was made.
    #[must_use]
    pub fn submissions(&self) -> Vec<(String, Instant)> {
        self.lock().submissions.clone()
    }

    pub fn list_calls(&self) -> u32 {
        self.lock().list_calls
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockClusterState> {
        self.state.lock().expect("mock cluster mutex poisoned")
    }
}

#[async_trait]
impl ClusterClient for MockCluster {
    async fn create_scope(&self, scope: &ScopeId) -> Result<(), ClusterError> {
        self.log.record(Call::CreateScope(scope.to_string()));
        match self.lock().create_error.clone() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn delete_scope(&self, scope: &ScopeId) -> Result<(), ClusterError> {
        self.log.record(Call::DeleteScope(scope.to_string()));
        Ok(())
    }

    async fn list_nodes(&self) -> Result<Vec<NodeInfo>, ClusterError> {
        self.log.record(Call::ListNodes);
        let delay = self.lock().nodes_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let state = self.lock();
        if state.nodes_fail {
            return Err(ClusterError::Transport("nodes unavailable".to_string()));
        }
        Ok((0..state.node_count)
            .map(|i| NodeInfo {
                name: format!("node-{i}"),
            })
            .collect())
    }

    async fn submit_job(&self, job: &JobRequest) -> Result<(), ClusterError> {
        self.log.record(Call::SubmitJob(job.test.clone()));
        let mut state = self.lock();
        state.submissions.push((job.test.clone(), Instant::now()));
        if state.failing_submissions.contains(&job.test) {
            return Err(ClusterError::Status {
                operation: "submit_job",
                status: 422,
                body: format!("pod {} rejected", job.test),
            });
        }
        Ok(())
    }

    async fn list_jobs(&self, scope: &ScopeId) -> Result<Vec<JobInfo>, ClusterError> {
        self.log.record(Call::ListJobs(scope.to_string()));
        let call = {
            let mut state = self.lock();
            state.list_calls += 1;
            state.list_calls
        };
        (self.jobs)(call)
    }

    async fn job_logs(&self, _scope: &ScopeId, job: &str) -> Result<String, ClusterError> {
        self.log.record(Call::JobLogs(job.to_string()));
        Ok(self
            .lock()
            .logs
            .get(job)
            .cloned()
            .unwrap_or_else(|| format!("log output of {job}\n")))
    }
}

/// Metrics sink that keeps every record.
pub struct RecordingMetrics {
    log: CallLog,
    records: Mutex<Vec<ProgressRecord>>,
    fail: bool,
}

impl RecordingMetrics {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            records: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    /// Record calls but report every write as failed.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    #[must_use]
    pub fn records(&self) -> Vec<ProgressRecord> {
        self.records.lock().expect("metrics mutex poisoned").clone()
    }
}

#[async_trait]
impl MetricsSink for RecordingMetrics {
    async fn record(&self, record: &ProgressRecord) -> Result<(), SinkError> {
        self.log.record(Call::Metric(record.event));
        self.records
            .lock()
            .expect("metrics mutex poisoned")
            .push(record.clone());
        if self.fail {
            return Err(SinkError::Transport("metrics backend down".to_string()));
        }
        Ok(())
    }
}

/// Notifier that keeps every message.
pub struct RecordingNotifier {
    log: CallLog,
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            messages: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().expect("notifier mutex poisoned").clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, text: &str) -> Result<(), SinkError> {
        self.log.record(Call::Notify(text.to_string()));
        self.messages
            .lock()
            .expect("notifier mutex poisoned")
            .push(text.to_string());
        Ok(())
    }
}

/// Source repository with a fixed commit and test list.
pub struct MockSource {
    log: CallLog,
    commit: String,
    tests: Vec<String>,
    checkout_error: Option<CheckoutError>,
}

impl MockSource {
    pub fn new(log: CallLog, commit: &str, tests: &[&str]) -> Self {
        Self {
            log,
            commit: commit.to_string(),
            tests: tests.iter().map(|t| t.to_string()).collect(),
            checkout_error: None,
        }
    }

    pub fn failing_checkout(mut self, error: CheckoutError) -> Self {
        self.checkout_error = Some(error);
        self
    }
}

#[async_trait]
impl SourceRepo for MockSource {
    async fn checkout(&self, branch: &str) -> Result<String, CheckoutError> {
        self.log.record(Call::Checkout(branch.to_string()));
        match &self.checkout_error {
            Some(err) => Err(err.clone()),
            None => Ok(self.commit.clone()),
        }
    }

    async fn discover_tests(&self) -> Result<Vec<String>, CheckoutError> {
        self.log.record(Call::DiscoverTests);
        Ok(self.tests.clone())
    }
}
