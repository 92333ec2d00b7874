//! Kubernetes REST implementation of [`ClusterClient`].
//!
//! A run's scope is a namespace; each test job is a single pod in it.

use async_trait::async_trait;
use itr_common::config::{ClusterConfig, JobConfig};
use itr_common::{ClusterClient, ClusterError, JobInfo, JobPhase, JobRequest, NodeInfo, ScopeId};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, Method, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::debug;

/// Container name used for every test pod.
pub const CONTAINER_NAME: &str = "integration-test-run";

/// Talks to the API server directly (or through `kubectl proxy`).
pub struct KubeClient {
    base_url: String,
    client: Client,
    job: JobConfig,
}

impl KubeClient {
    pub fn new(config: &ClusterConfig, job: JobConfig) -> Result<Self, ClusterError> {
        let mut headers = HeaderMap::new();
        if let Some(path) = &config.token_file {
            let token = std::fs::read_to_string(path).map_err(|e| {
                ClusterError::Config(format!("cannot read token file {}: {e}", path.display()))
            })?;
            let value = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
                .map_err(|_| ClusterError::Config("invalid bearer token".to_string()))?;
            headers.insert(AUTHORIZATION, value);
        }
        let client = Client::builder()
            .timeout(config.request_timeout())
            .default_headers(headers)
            .build()
            .map_err(|e| ClusterError::Config(e.to_string()))?;
        Ok(Self {
            base_url: config.api_url.trim_end_matches('/').to_string(),
            client,
            job,
        })
    }

    async fn call(
        &self,
        operation: &'static str,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Response, ClusterError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(operation, %url, "Cluster request");
        let mut request = self.client.request(method, url);
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ClusterError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ClusterError::Status {
                operation,
                status,
                body,
            });
        }
        Ok(response)
    }

    async fn call_json<T: for<'de> Deserialize<'de>>(
        &self,
        operation: &'static str,
        path: &str,
    ) -> Result<T, ClusterError> {
        self.call(operation, Method::GET, path, None)
            .await?
            .json()
            .await
            .map_err(|e| ClusterError::Decode {
                operation,
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl ClusterClient for KubeClient {
    async fn create_scope(&self, scope: &ScopeId) -> Result<(), ClusterError> {
        self.call(
            "create_scope",
            Method::POST,
            "/api/v1/namespaces",
            Some(namespace_manifest(scope)),
        )
        .await?;
        Ok(())
    }

    async fn delete_scope(&self, scope: &ScopeId) -> Result<(), ClusterError> {
        let path = format!("/api/v1/namespaces/{}", urlencoding::encode(scope.as_str()));
        self.call("delete_scope", Method::DELETE, &path, None).await?;
        Ok(())
    }

    async fn list_nodes(&self) -> Result<Vec<NodeInfo>, ClusterError> {
        let list: ObjectList = self.call_json("list_nodes", "/api/v1/nodes").await?;
        Ok(list
            .items
            .into_iter()
            .map(|item| NodeInfo {
                name: item.metadata.name,
            })
            .collect())
    }

    async fn submit_job(&self, job: &JobRequest) -> Result<(), ClusterError> {
        let path = format!(
            "/api/v1/namespaces/{}/pods",
            urlencoding::encode(job.scope.as_str())
        );
        self.call(
            "submit_job",
            Method::POST,
            &path,
            Some(pod_manifest(&self.job, job)),
        )
        .await?;
        Ok(())
    }

    async fn list_jobs(&self, scope: &ScopeId) -> Result<Vec<JobInfo>, ClusterError> {
        let path = format!("/api/v1/namespaces/{}/pods", urlencoding::encode(scope.as_str()));
        let list: ObjectList = self.call_json("list_jobs", &path).await?;
        Ok(list.into_jobs())
    }

    async fn job_logs(&self, scope: &ScopeId, job: &str) -> Result<String, ClusterError> {
        let path = format!(
            "/api/v1/namespaces/{}/pods/{}/log",
            urlencoding::encode(scope.as_str()),
            urlencoding::encode(job)
        );
        self.call("job_logs", Method::GET, &path, None)
            .await?
            .text()
            .await
            .map_err(|e| ClusterError::Decode {
                operation: "job_logs",
                reason: e.to_string(),
            })
    }
}

#[derive(Debug, Default, Deserialize)]
struct ObjectList {
    #[serde(default)]
    items: Vec<Object>,
}

#[derive(Debug, Deserialize)]
struct Object {
    metadata: Metadata,
    #[serde(default)]
    status: Option<PodStatus>,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PodStatus {
    #[serde(default)]
    phase: Option<String>,
}

impl ObjectList {
    fn into_jobs(self) -> Vec<JobInfo> {
        self.items
            .into_iter()
            .map(|item| {
                let phase = item
                    .status
                    .and_then(|s| s.phase)
                    .map(|p| JobPhase::from_cluster(&p))
                    .unwrap_or(JobPhase::Pending);
                JobInfo::new(item.metadata.name, phase)
            })
            .collect()
    }
}

/// Pod name for a test: underscores are not valid in DNS labels.
pub fn pod_name(test: &str) -> String {
    test.replace('_', "-")
}

fn namespace_manifest(scope: &ScopeId) -> Value {
    json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": {
            "name": scope.as_str(),
            "labels": { "name": scope.as_str() },
        },
    })
}

fn expand(template: &str, job: &JobRequest) -> String {
    template
        .replace("{branch}", &job.branch)
        .replace("{commit}", &job.commit)
        .replace("{test}", &job.test)
}

/// Pod manifest for one test job.
pub fn pod_manifest(config: &JobConfig, job: &JobRequest) -> Value {
    let name = pod_name(&job.test);
    let mut env = vec![
        json!({ "name": "GIT_BRANCH", "value": job.branch }),
        json!({ "name": "GIT_COMMIT", "value": job.commit }),
        json!({ "name": "NUM_TESTS", "value": job.total_tests.to_string() }),
    ];
    env.extend(
        config
            .env
            .iter()
            .map(|(key, value)| json!({ "name": key, "value": value })),
    );
    let command: Vec<String> = config.command.iter().map(|c| expand(c, job)).collect();

    json!({
        "apiVersion": "v1",
        "kind": "Pod",
        "metadata": {
            "name": name,
            "namespace": job.scope.as_str(),
            "labels": { "test": name },
        },
        "spec": {
            "restartPolicy": "Never",
            "containers": [{
                "name": CONTAINER_NAME,
                "image": expand(&config.image, job),
                "imagePullPolicy": config.image_pull_policy,
                "command": command,
                "env": env,
                "resources": {
                    "limits": { "cpu": config.cpu_limit, "memory": config.memory_limit },
                    "requests": { "cpu": config.cpu_request, "memory": config.memory_request },
                },
            }],
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> JobRequest {
        JobRequest {
            scope: ScopeId::new("develop", "abc1234"),
            branch: "develop".to_string(),
            commit: "abc1234".to_string(),
            test: "name_register_expired".to_string(),
            total_tests: 42,
        }
    }

    #[test]
    fn pod_manifest_uses_templates_and_env() {
        let mut config = JobConfig::default();
        config
            .env
            .insert("BLOCKSTACK_DEBUG".to_string(), "1".to_string());

        let pod = pod_manifest(&config, &request());

        assert_eq!(pod["metadata"]["name"], "name-register-expired");
        assert_eq!(pod["metadata"]["namespace"], "develop-abc1234");
        assert_eq!(pod["metadata"]["labels"]["test"], "name-register-expired");
        assert_eq!(pod["spec"]["restartPolicy"], "Never");

        let container = &pod["spec"]["containers"][0];
        assert_eq!(container["name"], CONTAINER_NAME);
        assert_eq!(
            container["image"],
            "quay.io/blockstack/integrationtests:develop"
        );
        assert_eq!(
            container["command"][1],
            "blockstack_integration_tests.scenarios.name_register_expired"
        );
        assert_eq!(container["resources"]["limits"]["memory"], "4Gi");
        assert_eq!(container["resources"]["requests"]["memory"], "1Gi");

        let env = container["env"].as_array().unwrap();
        assert_eq!(env[0], json!({ "name": "GIT_BRANCH", "value": "develop" }));
        assert_eq!(env[1], json!({ "name": "GIT_COMMIT", "value": "abc1234" }));
        assert_eq!(env[2], json!({ "name": "NUM_TESTS", "value": "42" }));
        assert_eq!(env[3], json!({ "name": "BLOCKSTACK_DEBUG", "value": "1" }));
    }

    #[test]
    fn namespace_manifest_is_labelled() {
        let ns = namespace_manifest(&ScopeId::new("develop", "abc1234"));
        assert_eq!(ns["kind"], "Namespace");
        assert_eq!(ns["metadata"]["labels"]["name"], "develop-abc1234");
    }

    #[test]
    fn pod_list_phases_are_classified() {
        let list: ObjectList = serde_json::from_value(json!({
            "kind": "PodList",
            "items": [
                { "metadata": { "name": "a" }, "status": { "phase": "Running" } },
                { "metadata": { "name": "b" }, "status": { "phase": "Failed" } },
                { "metadata": { "name": "c" }, "status": { "phase": "Unknown" } },
                { "metadata": { "name": "d" } },
            ]
        }))
        .unwrap();

        assert_eq!(
            list.into_jobs(),
            vec![
                JobInfo::new("a", JobPhase::Running),
                JobInfo::new("b", JobPhase::Failed),
                JobInfo::new("c", JobPhase::Pending),
                JobInfo::new("d", JobPhase::Pending),
            ]
        );
    }

    #[test]
    fn empty_list_has_no_items() {
        let list: ObjectList = serde_json::from_value(json!({ "kind": "NodeList" })).unwrap();
        assert!(list.into_jobs().is_empty());
    }

    #[test]
    fn missing_token_file_is_config_error() {
        let config = ClusterConfig {
            token_file: Some("/nonexistent/itr-token".into()),
            ..ClusterConfig::default()
        };
        assert!(matches!(
            KubeClient::new(&config, JobConfig::default()),
            Err(ClusterError::Config(_))
        ));
    }
}
