//! Configuration system for ITR.
//!
//! Configuration is read from a TOML file where every field has a default,
//! then selected values are overridden from `ITR_*` environment variables,
//! then the result is validated.

pub mod env;

pub use env::{EnvError, EnvParser};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::ConfigError;

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ItrConfig {
    pub general: GeneralConfig,
    pub server: ServerConfig,
    pub cluster: ClusterConfig,
    pub job: JobConfig,
    pub metrics: MetricsConfig,
    pub notify: NotifyConfig,
    pub run: RunConfig,
    pub source: SourceConfig,
    pub logs: LogsConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the webhook/status server listens on.
    pub bind: String,
    /// Externally reachable base URL, used to build log locations.
    pub public_url: String,
    /// Terminal runs kept in the registry for the status API.
    pub run_history: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            public_url: "http://localhost:8080".to_string(),
            run_history: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Kubernetes API server base URL.
    pub api_url: String,
    /// File holding a bearer token for the API server.
    pub token_file: Option<PathBuf>,
    pub request_timeout_secs: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:8001".to_string(),
            token_file: None,
            request_timeout_secs: 30,
        }
    }
}

impl ClusterConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Shape of every submitted job. `{branch}`, `{commit}` and `{test}` are
/// substituted in `image` and `command`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    pub image: String,
    pub command: Vec<String>,
    pub image_pull_policy: String,
    pub cpu_limit: String,
    pub memory_limit: String,
    pub cpu_request: String,
    pub memory_request: String,
    /// Extra environment passed to every job.
    pub env: BTreeMap<String, String>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            image: "quay.io/blockstack/integrationtests:{branch}".to_string(),
            command: vec![
                "blockstack-test-scenario".to_string(),
                "blockstack_integration_tests.scenarios.{test}".to_string(),
                "--influx".to_string(),
            ],
            image_pull_policy: "Always".to_string(),
            cpu_limit: "1000m".to_string(),
            memory_limit: "4Gi".to_string(),
            cpu_request: "1000m".to_string(),
            memory_request: "1Gi".to_string(),
            env: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// InfluxDB HTTP endpoint. Unset means progress is only logged.
    pub url: Option<String>,
    pub database: String,
    pub measurement: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            url: None,
            database: "testing".to_string(),
            measurement: "test_progress".to_string(),
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Slack incoming-webhook URL. Unset means messages are only logged.
    pub slack_url: Option<String>,
    /// Dashboard link included in the "run started" message.
    pub dashboard_url: Option<String>,
}

/// Timing and termination policy of the run controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub submit_interval_ms: u64,
    pub poll_interval_secs: u64,
    /// Success needs strictly more than this many polls.
    pub success_after_polls: u32,
    /// A run is declared stalled once this many polls have happened.
    pub stall_after_polls: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            submit_interval_ms: 100,
            poll_interval_secs: 60,
            success_after_polls: 5,
            stall_after_polls: 90,
        }
    }
}

impl RunConfig {
    pub fn submit_interval(&self) -> Duration {
        Duration::from_millis(self.submit_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Local clone the tests are checked out in.
    pub repo_dir: PathBuf,
    pub remote: String,
    /// Scenario directory, relative to `repo_dir`.
    pub scenarios_dir: PathBuf,
    /// Skip list, relative to `repo_dir`.
    pub skip_file: PathBuf,
    pub checkout_timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            repo_dir: PathBuf::from("blockstack-core"),
            remote: "origin".to_string(),
            scenarios_dir: PathBuf::from("integration_tests/blockstack_integration_tests/scenarios"),
            skip_file: PathBuf::from(
                "integration_tests/blockstack_integration_tests/tests_skip.txt",
            ),
            checkout_timeout_secs: 300,
        }
    }
}

impl SourceConfig {
    pub fn checkout_timeout(&self) -> Duration {
        Duration::from_secs(self.checkout_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogsConfig {
    /// Root directory for persisted job logs.
    pub dir: PathBuf,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("test-out"),
        }
    }
}

impl ItrConfig {
    /// Parse configuration from TOML text.
    pub fn from_toml(path: &Path, text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load from a file, apply process environment overrides and validate.
    ///
    /// A missing file is not an error when `required` is false; defaults are
    /// used instead.
    pub fn load(path: &Path, required: bool) -> Result<Self, ConfigError> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(text) => Self::from_toml(path, &text)?,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound && !required => {
                Self::default()
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };
        config.apply_env(&mut EnvParser::new())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `ITR_*` overrides. All invalid variables are reported together.
    pub fn apply_env(&mut self, parser: &mut EnvParser) -> Result<(), ConfigError> {
        if let Some(level) = parser.get_log_level("LOG_LEVEL") {
            self.general.log_level = level;
        }
        if let Some(bind) = parser.get_string("BIND") {
            self.server.bind = bind;
        }
        if let Some(url) = parser.get_string("PUBLIC_URL") {
            self.server.public_url = url;
        }
        if let Some(url) = parser.get_string("CLUSTER_API_URL") {
            self.cluster.api_url = url;
        }
        if let Some(path) = parser.get_path("CLUSTER_TOKEN_FILE") {
            self.cluster.token_file = Some(path);
        }
        if let Some(url) = parser.get_string("METRICS_URL") {
            self.metrics.url = Some(url);
        }
        if let Some(password) = parser.get_string("METRICS_PASSWORD") {
            self.metrics.password = Some(password);
        }
        if let Some(url) = parser.get_string("SLACK_URL") {
            self.notify.slack_url = Some(url);
        }
        if let Some(secs) = parser.get_u64_range("POLL_INTERVAL_SECS", 1, 3600) {
            self.run.poll_interval_secs = secs;
        }
        if let Some(ms) = parser.get_u64_range("SUBMIT_INTERVAL_MS", 1, 60_000) {
            self.run.submit_interval_ms = ms;
        }
        if let Some(dir) = parser.get_path("REPO_DIR") {
            self.source.repo_dir = dir;
        }

        if parser.has_errors() {
            return Err(ConfigError::Env(parser.take_errors()));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.run.submit_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "run.submit_interval_ms must be greater than 0".to_string(),
            ));
        }
        if self.run.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "run.poll_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.run.stall_after_polls <= self.run.success_after_polls {
            return Err(ConfigError::Invalid(format!(
                "run.stall_after_polls ({}) must exceed run.success_after_polls ({})",
                self.run.stall_after_polls, self.run.success_after_polls
            )));
        }
        if self.job.image.trim().is_empty() {
            return Err(ConfigError::Invalid("job.image must not be empty".to_string()));
        }
        if self.job.command.is_empty() {
            return Err(ConfigError::Invalid("job.command must not be empty".to_string()));
        }
        Ok(())
    }
}
