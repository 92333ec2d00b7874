//! Cluster orchestration interface consumed by the run controller.

use async_trait::async_trait;

use crate::errors::ClusterError;
use crate::types::{JobInfo, JobRequest, NodeInfo, ScopeId};

/// Narrow view of the cluster API: scopes, nodes, jobs and job logs.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Create the isolated execution scope for a run.
    async fn create_scope(&self, scope: &ScopeId) -> Result<(), ClusterError>;

    /// Delete an execution scope and everything in it.
    async fn delete_scope(&self, scope: &ScopeId) -> Result<(), ClusterError>;

    /// List the compute nodes currently in the cluster.
    async fn list_nodes(&self) -> Result<Vec<NodeInfo>, ClusterError>;

    /// Submit one test job into its run's scope.
    async fn submit_job(&self, job: &JobRequest) -> Result<(), ClusterError>;

    /// List every job currently present in a scope.
    async fn list_jobs(&self, scope: &ScopeId) -> Result<Vec<JobInfo>, ClusterError>;

    /// Fetch the full log output of one job.
    async fn job_logs(&self, scope: &ScopeId, job: &str) -> Result<String, ClusterError>;
}
