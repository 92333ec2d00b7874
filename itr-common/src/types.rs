//! Common types used across ITR components.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of the isolated cluster namespace holding one run's jobs.
///
/// Always `branch-commit`, built from an already sanitized branch token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeId(String);

impl ScopeId {
    pub fn new(branch: &str, commit: &str) -> Self {
        Self(format!("{branch}-{commit}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ScopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Turn a raw branch or tag name into a token usable as a namespace name.
///
/// Lowercases, replaces anything outside `[a-z0-9-]` with `-` and trims
/// dashes from both ends. Returns `None` when nothing usable remains.
pub fn sanitize_scope_token(raw: &str) -> Option<String> {
    let replaced: String = raw
        .trim()
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    let trimmed = replaced.trim_matches('-');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Lifecycle phase of a job as reported by the cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobPhase {
    /// Parse a cluster phase string. Unrecognised phases (e.g. `Unknown`)
    /// are still outstanding work and classify as pending.
    pub fn from_cluster(phase: &str) -> Self {
        match phase.to_ascii_lowercase().as_str() {
            "running" => Self::Running,
            "succeeded" => Self::Succeeded,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A job observed in a scope during one poll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInfo {
    pub name: String,
    pub phase: JobPhase,
}

impl JobInfo {
    pub fn new(name: impl Into<String>, phase: JobPhase) -> Self {
        Self {
            name: name.into(),
            phase,
        }
    }
}

/// A compute node in the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
}

/// Everything the cluster needs to create one test job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub scope: ScopeId,
    pub branch: String,
    pub commit: String,
    pub test: String,
    pub total_tests: usize,
}

/// Which kind of progress record is being written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressEvent {
    #[serde(rename = "startStop")]
    StartStop,
    #[serde(rename = "progress")]
    Progress,
}

impl ProgressEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StartStop => "startStop",
            Self::Progress => "progress",
        }
    }
}

/// One timestamped progress point for the metrics sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub branch: String,
    pub commit: String,
    pub event: ProgressEvent,
    pub total_tests: usize,
    pub num_pods: usize,
    pub num_nodes: usize,
    pub complete_percent: f64,
    pub completed: usize,
    pub remaining_percent: f64,
    pub remaining: usize,
    pub recorded_at: DateTime<Utc>,
}

impl ProgressRecord {
    /// The `branch-commit` run label used as a metrics tag.
    pub fn test_run(&self) -> String {
        format!("{}-{}", self.branch, self.commit)
    }
}

/// Status of a test run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Run initialised, scope not yet provisioned.
    Created,
    /// Jobs are still being submitted (polling runs alongside).
    SubmittingJobs,
    /// Every job has been submitted; only polling remains.
    Polling,
    /// No jobs left in the scope after the minimum number of polls.
    CompletedSuccess,
    /// The stall threshold was reached before the scope emptied.
    CompletedStalled,
    /// The execution scope could not be created.
    FailedToStart,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::CompletedSuccess | Self::CompletedStalled | Self::FailedToStart
        )
    }
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::Created
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::SubmittingJobs => write!(f, "submitting_jobs"),
            Self::Polling => write!(f, "polling"),
            Self::CompletedSuccess => write!(f, "completed_success"),
            Self::CompletedStalled => write!(f, "completed_stalled"),
            Self::FailedToStart => write!(f, "failed_to_start"),
        }
    }
}

/// Point-in-time view of a run, published to watchers and the status API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub scope: ScopeId,
    pub branch: String,
    pub commit: String,
    pub total: usize,
    pub submitted: usize,
    pub submission_failures: usize,
    pub poll_count: u32,
    pub failed_jobs: Vec<String>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_id_joins_branch_and_commit() {
        let scope = ScopeId::new("develop", "a1b2c3d");
        assert_eq!(scope.as_str(), "develop-a1b2c3d");
        assert_eq!(scope.to_string(), "develop-a1b2c3d");
    }

    #[test]
    fn sanitize_replaces_slashes_and_case() {
        assert_eq!(
            sanitize_scope_token("Feature/New_Thing").as_deref(),
            Some("feature-new-thing")
        );
        assert_eq!(sanitize_scope_token("develop").as_deref(), Some("develop"));
    }

    #[test]
    fn sanitize_trims_edge_dashes_and_rejects_empty() {
        assert_eq!(sanitize_scope_token("/release/").as_deref(), Some("release"));
        assert_eq!(sanitize_scope_token("///"), None);
        assert_eq!(sanitize_scope_token("   "), None);
    }

    #[test]
    fn phase_parsing_is_case_insensitive() {
        assert_eq!(JobPhase::from_cluster("Running"), JobPhase::Running);
        assert_eq!(JobPhase::from_cluster("SUCCEEDED"), JobPhase::Succeeded);
        assert_eq!(JobPhase::from_cluster("Failed"), JobPhase::Failed);
        assert_eq!(JobPhase::from_cluster("Pending"), JobPhase::Pending);
    }

    #[test]
    fn unknown_phase_counts_as_pending() {
        assert_eq!(JobPhase::from_cluster("Unknown"), JobPhase::Pending);
        assert_eq!(JobPhase::from_cluster(""), JobPhase::Pending);
    }

    #[test]
    fn progress_event_serializes_to_wire_names() {
        let json = serde_json::to_string(&ProgressEvent::StartStop).unwrap();
        assert_eq!(json, "\"startStop\"");
        assert_eq!(ProgressEvent::Progress.as_str(), "progress");
    }

    #[test]
    fn terminal_statuses() {
        assert!(RunStatus::CompletedSuccess.is_terminal());
        assert!(RunStatus::CompletedStalled.is_terminal());
        assert!(RunStatus::FailedToStart.is_terminal());
        assert!(!RunStatus::Polling.is_terminal());
        assert!(!RunStatus::SubmittingJobs.is_terminal());
        assert_eq!(RunStatus::default(), RunStatus::Created);
    }
}
