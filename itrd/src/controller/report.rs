//! Human-readable notification texts.

use chrono::{DateTime, Utc};
use itr_common::{RunStatus, ScopeId};

pub fn run_started(scope: &ScopeId, dashboard_url: Option<&str>) -> String {
    match dashboard_url {
        Some(url) => format!(
            "Test `{scope}` started. Go to the dashboard to watch progress: `{url}`."
        ),
        None => format!("Test `{scope}` started."),
    }
}

pub fn job_failed(job: &str, location: &str) -> String {
    format!("Test `{job}` failed. Logs available: `{location}`")
}

pub fn job_stalled(job: &str, location: &str) -> String {
    format!("Test `{job}` stalled. Logs available: `{location}`")
}

/// Inputs of the final run summary.
#[derive(Debug, Clone)]
pub struct Summary<'a> {
    pub scope: &'a ScopeId,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total: usize,
    pub failed: &'a [String],
    pub stalled: &'a [String],
}

impl Summary<'_> {
    pub fn render(&self) -> String {
        let minutes = (self.finished_at - self.started_at).num_minutes().max(0);
        let outcome = match self.status {
            RunStatus::CompletedStalled => "stalled",
            _ => "completed",
        };
        let succeeded = self.total.saturating_sub(self.failed.len());
        let mut text = format!(
            "```Integration Test Run Results for {}:\n  Outcome:       {}\n  Test Time:     {} minutes\n  Number Tests:  {}\n  Success Tests: {}\n  Failed Tests:  {}",
            self.scope,
            outcome,
            minutes,
            self.total,
            succeeded,
            list_or_none(self.failed)
        );
        if self.status == RunStatus::CompletedStalled {
            text.push_str(&format!("\n  Stalled Tests: {}", list_or_none(self.stalled)));
        }
        text.push_str("```");
        text
    }
}

fn list_or_none(names: &[String]) -> String {
    if names.is_empty() {
        "none".to_string()
    } else {
        names.join(", ")
    }
}
