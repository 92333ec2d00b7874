//! Webhook pipeline: image-push notification to a started run.

use itr_common::{CheckoutError, ScopeId, SourceRepo, sanitize_scope_token};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::controller::{RunController, RunRequest};
use crate::metrics;
use crate::registry::RunRegistry;

/// Body of a repository push notification.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushPayload {
    #[serde(default)]
    pub updated_tags: Vec<String>,
}

/// Reply sent once a run has been started.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunAccepted {
    pub scope: String,
    pub branch: String,
    pub commit: String,
    pub tests: usize,
    #[serde(rename = "getPods")]
    pub get_pods: String,
    #[serde(rename = "deleteNamespace")]
    pub delete_namespace: String,
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("payload carries no tag")]
    MissingTag,

    #[error("tag {0:?} does not yield a usable scope name")]
    InvalidBranch(String),

    #[error(transparent)]
    Checkout(#[from] CheckoutError),
}

/// The branch to check out and the sanitized token used in the scope name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branch {
    pub raw: String,
    pub token: String,
}

/// First non-empty tag of the payload.
pub fn resolve_branch(payload: &PushPayload) -> Result<Branch, WebhookError> {
    let raw = payload
        .updated_tags
        .iter()
        .map(|tag| tag.trim())
        .find(|tag| !tag.is_empty())
        .ok_or(WebhookError::MissingTag)?;
    let token =
        sanitize_scope_token(raw).ok_or_else(|| WebhookError::InvalidBranch(raw.to_string()))?;
    Ok(Branch {
        raw: raw.to_string(),
        token,
    })
}

/// Checks out the pushed branch, discovers its tests and starts a run.
#[derive(Clone)]
pub struct Launcher {
    source: Arc<dyn SourceRepo>,
    controller: RunController,
    registry: RunRegistry,
}

impl Launcher {
    pub fn new(source: Arc<dyn SourceRepo>, controller: RunController, registry: RunRegistry) -> Self {
        Self {
            source,
            controller,
            registry,
        }
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    pub async fn launch(&self, payload: &PushPayload) -> Result<RunAccepted, WebhookError> {
        let branch = resolve_branch(payload)?;
        info!(branch = %branch.raw, "Push notification received");

        let (commit, tests) = match self.prepare(&branch.raw).await {
            Ok(prepared) => prepared,
            Err(e) => {
                error!(branch = %branch.raw, "Checkout failed, no run started: {}", e);
                metrics::CHECKOUT_FAILURES.inc();
                return Err(e.into());
            }
        };

        let scope = ScopeId::new(&branch.token, &commit);
        if self.registry.contains(&scope) {
            warn!(scope = %scope, "Scope already has a run; replacing its registry entry");
        }
        let handle = self.controller.start(RunRequest {
            branch: branch.token.clone(),
            commit: commit.clone(),
            tests,
        });
        let accepted = RunAccepted {
            scope: scope.to_string(),
            branch: branch.token,
            commit,
            tests: handle.snapshot().total,
            get_pods: format!("kubectl get pods --namespace {scope}"),
            delete_namespace: format!("kubectl delete ns {scope}"),
        };
        self.registry.insert(handle);
        Ok(accepted)
    }

    async fn prepare(&self, branch: &str) -> Result<(String, Vec<String>), CheckoutError> {
        let commit = self.source.checkout(branch).await?;
        let tests = self.source.discover_tests().await?;
        Ok((commit, tests))
    }
}
