//! On-disk storage of job logs, addressed by scope and job name.

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Writes job logs under `<root>/<scope>/<job>` and builds the public URL
/// they are served from.
#[derive(Debug, Clone)]
pub struct LogStore {
    root: PathBuf,
    public_url: String,
}

impl LogStore {
    pub fn new(root: impl Into<PathBuf>, public_url: &str) -> Self {
        Self {
            root: root.into(),
            public_url: public_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the directory for a scope if it does not exist yet.
    pub async fn ensure_scope(&self, scope: &str) -> io::Result<()> {
        let dir = self.scope_dir(scope)?;
        fs::create_dir_all(dir).await
    }

    /// Persist a job log, creating the scope directory when needed.
    pub async fn write(&self, scope: &str, job: &str, contents: &str) -> io::Result<PathBuf> {
        let path = self.path_for(scope, job)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, contents).await?;
        Ok(path)
    }

    pub async fn read(&self, scope: &str, job: &str) -> io::Result<String> {
        let path = self.path_for(scope, job)?;
        fs::read_to_string(path).await
    }

    /// Public location of a job log, as sent in notifications.
    pub fn location(&self, scope: &str, job: &str) -> String {
        format!(
            "{}/logs/{}/{}",
            self.public_url,
            urlencoding::encode(scope),
            urlencoding::encode(job)
        )
    }

    fn scope_dir(&self, scope: &str) -> io::Result<PathBuf> {
        if !is_safe_component(scope) {
            return Err(invalid_component(scope));
        }
        Ok(self.root.join(scope))
    }

    fn path_for(&self, scope: &str, job: &str) -> io::Result<PathBuf> {
        if !is_safe_component(job) {
            return Err(invalid_component(job));
        }
        Ok(self.scope_dir(scope)?.join(job))
    }
}

/// A single path segment that cannot escape the log root.
pub fn is_safe_component(component: &str) -> bool {
    !component.is_empty()
        && !component.starts_with('.')
        && !component.contains(['/', '\\', '\0'])
}

fn invalid_component(component: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidInput,
        format!("invalid log path component: {component:?}"),
    )
}
