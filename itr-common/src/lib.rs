//! Shared types, configuration and collaborator interfaces for the
//! Integration Test Runner.

pub mod cluster;
pub mod config;
pub mod errors;
pub mod mock;
pub mod sinks;
pub mod source;
pub mod testing;
pub mod types;

pub use cluster::ClusterClient;
pub use config::{ItrConfig, LogFormat, RunConfig};
pub use errors::{CheckoutError, ClusterError, ConfigError, RunError, SinkError};
pub use sinks::{MetricsSink, Notifier};
pub use source::SourceRepo;
pub use types::{
    JobInfo, JobPhase, JobRequest, NodeInfo, ProgressEvent, ProgressRecord, RunSnapshot,
    RunStatus, ScopeId, sanitize_scope_token,
};
