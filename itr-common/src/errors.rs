//! Error types shared by the controller and its collaborators.
//!
//! | Enum            | Raised by                                   |
//! |-----------------|---------------------------------------------|
//! | `ClusterError`  | cluster orchestration API calls             |
//! | `SinkError`     | metrics and notification sinks              |
//! | `CheckoutError` | source checkout and test discovery          |
//! | `RunError`      | run controller classification of failures   |
//! | `ConfigError`   | configuration loading and validation        |

use std::path::PathBuf;
use thiserror::Error;

use crate::config::EnvError;

/// A failed call to the cluster orchestration API.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClusterError {
    /// The request never produced a response (connect, timeout, TLS).
    #[error("cluster request failed: {0}")]
    Transport(String),

    /// The API answered with a non-success status.
    #[error("cluster returned {status} for {operation}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },

    /// The API answered but the body could not be understood.
    #[error("invalid cluster response for {operation}: {reason}")]
    Decode {
        operation: &'static str,
        reason: String,
    },

    /// The client could not be constructed from configuration.
    #[error("cluster client misconfigured: {0}")]
    Config(String),
}

/// A failed write to a metrics or notification sink.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SinkError {
    #[error("sink request failed: {0}")]
    Transport(String),

    #[error("sink returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to encode sink payload: {0}")]
    Encode(String),
}

/// Source checkout or test discovery did not complete.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CheckoutError {
    #[error("git {command} exited with {status}: {stderr}")]
    Git {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("i/o error during checkout: {0}")]
    Io(String),

    #[error("checkout of {branch} did not finish within {secs}s")]
    Timeout { branch: String, secs: u64 },

    #[error("test discovery failed: {0}")]
    Discovery(String),
}

/// Classification of everything that can go wrong while a run is active.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RunError {
    /// The execution scope could not be created; the run never starts.
    #[error("failed to provision scope {scope}: {source}")]
    Provisioning {
        scope: String,
        #[source]
        source: ClusterError,
    },

    /// A single cluster, metrics or notification call failed.
    #[error("{call} failed: {message}")]
    Transient { call: &'static str, message: String },

    /// One job could not be submitted; it is never retried.
    #[error("failed to submit job {test}: {source}")]
    Submission {
        test: String,
        #[source]
        source: ClusterError,
    },
}

impl RunError {
    pub fn transient(call: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Transient {
            call,
            message: err.to_string(),
        }
    }
}

/// Configuration could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("invalid environment overrides: {}", format_env_errors(.0))]
    Env(Vec<EnvError>),
}

fn format_env_errors(errors: &[EnvError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provisioning_error_keeps_source() {
        let err = RunError::Provisioning {
            scope: "develop-abc1234".to_string(),
            source: ClusterError::Status {
                operation: "create_scope",
                status: 409,
                body: "AlreadyExists".to_string(),
            },
        };
        let text = err.to_string();
        assert!(text.contains("develop-abc1234"));
        assert!(text.contains("409"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn transient_error_names_the_call() {
        let err = RunError::transient("list_nodes", "connection reset");
        assert_eq!(err.to_string(), "list_nodes failed: connection reset");
    }

    #[test]
    fn env_errors_are_joined() {
        let err = ConfigError::Env(vec![
            EnvError::InvalidValue {
                var: "ITR_POLL_INTERVAL_SECS".to_string(),
                expected: "unsigned 64-bit integer".to_string(),
                value: "soon".to_string(),
            },
            EnvError::InvalidLogLevel {
                var: "ITR_LOG_LEVEL".to_string(),
                value: "loud".to_string(),
            },
        ]);
        let text = err.to_string();
        assert!(text.contains("ITR_POLL_INTERVAL_SECS"));
        assert!(text.contains("; "));
        assert!(text.contains("loud"));
    }
}
