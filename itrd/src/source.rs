//! Git working tree and scenario discovery.

use async_trait::async_trait;
use itr_common::config::SourceConfig;
use itr_common::{CheckoutError, SourceRepo};
use std::collections::BTreeSet;
use std::path::Path;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// A local clone shared by every run. Checkouts are serialized because they
/// all move the same working tree.
pub struct GitSource {
    config: SourceConfig,
    lock: Mutex<()>,
}

impl GitSource {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            config,
            lock: Mutex::new(()),
        }
    }

    async fn git(&self, args: &[&str]) -> Result<String, CheckoutError> {
        debug!(repo = %self.config.repo_dir.display(), "git {}", args.join(" "));
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.config.repo_dir)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| CheckoutError::Io(format!("failed to run git: {e}")))?;
        if !output.status.success() {
            return Err(CheckoutError::Git {
                command: args.join(" "),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn update(&self, branch: &str) -> Result<String, CheckoutError> {
        let upstream = format!("{}/{}", self.config.remote, branch);
        self.git(&["fetch", "--all"]).await?;
        self.git(&["checkout", branch]).await?;
        self.git(&["merge", "--ff-only", &upstream]).await?;
        self.git(&["rev-parse", "--short", "HEAD"]).await
    }
}

#[async_trait]
impl SourceRepo for GitSource {
    async fn checkout(&self, branch: &str) -> Result<String, CheckoutError> {
        let _guard = self.lock.lock().await;
        let timeout = self.config.checkout_timeout();
        let commit = tokio::time::timeout(timeout, self.update(branch))
            .await
            .map_err(|_| CheckoutError::Timeout {
                branch: branch.to_string(),
                secs: timeout.as_secs(),
            })??;
        info!(branch, commit = %commit, "Checked out source");
        Ok(commit)
    }

    async fn discover_tests(&self) -> Result<Vec<String>, CheckoutError> {
        let root = &self.config.repo_dir;
        discover(
            &root.join(&self.config.scenarios_dir),
            &root.join(&self.config.skip_file),
        )
        .await
    }
}

/// Scenario names under `scenarios_dir`, minus the skip list, sorted.
///
/// A name is the file name up to its first `.`; `foo.py` and `foo.pyc` are
/// the same scenario. A missing skip file skips nothing.
pub async fn discover(scenarios_dir: &Path, skip_file: &Path) -> Result<Vec<String>, CheckoutError> {
    let skip = read_skip_list(skip_file).await?;

    let mut entries = tokio::fs::read_dir(scenarios_dir).await.map_err(|e| {
        CheckoutError::Discovery(format!("cannot list {}: {e}", scenarios_dir.display()))
    })?;
    let mut tests = BTreeSet::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| CheckoutError::Discovery(e.to_string()))?
    {
        let file_name = entry.file_name();
        let Some(name) = file_name.to_str() else {
            continue;
        };
        let stem = name.split('.').next().unwrap_or_default();
        if stem.is_empty() || skip.contains(stem) {
            continue;
        }
        tests.insert(stem.to_string());
    }
    Ok(tests.into_iter().collect())
}

async fn read_skip_list(path: &Path) -> Result<BTreeSet<String>, CheckoutError> {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
        Err(e) => {
            return Err(CheckoutError::Discovery(format!(
                "cannot read skip list {}: {e}",
                path.display()
            )));
        }
    };
    Ok(parse_skip_list(&text))
}

fn parse_skip_list(text: &str) -> BTreeSet<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn discovery_strips_extensions_dedups_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        let scenarios = dir.path().join("scenarios");
        fs::create_dir(&scenarios).unwrap();
        for name in [
            "name_register.py",
            "name_register.pyc",
            "__init__.py",
            "atlas_basic.py",
            "name_renew.py",
        ] {
            fs::write(scenarios.join(name), "").unwrap();
        }
        let skip = dir.path().join("tests_skip.txt");
        fs::write(&skip, "# flaky\n\nname_renew\n__init__\n").unwrap();

        let tests = discover(&scenarios, &skip).await.unwrap();

        assert_eq!(tests, ["atlas_basic", "name_register"]);
    }

    #[tokio::test]
    async fn missing_skip_file_skips_nothing() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.py"), "").unwrap();
        let tests = discover(dir.path(), &dir.path().join("absent.txt"))
            .await
            .unwrap();
        assert_eq!(tests, ["a"]);
    }

    #[tokio::test]
    async fn missing_scenarios_dir_is_discovery_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = discover(&dir.path().join("nope"), &dir.path().join("skip"))
            .await
            .unwrap_err();
        assert!(matches!(err, CheckoutError::Discovery(_)));
    }

    #[test]
    fn skip_list_ignores_comments_and_blanks() {
        let skip = parse_skip_list("  a  \n# b\n\n c\n");
        assert_eq!(skip.into_iter().collect::<Vec<_>>(), ["a", "c"]);
    }

    #[tokio::test]
    async fn checkout_outside_a_repository_fails() {
        let dir = tempfile::tempdir().unwrap();
        let source = GitSource::new(SourceConfig {
            repo_dir: dir.path().join("missing"),
            ..SourceConfig::default()
        });
        let err = source.checkout("develop").await.unwrap_err();
        assert!(matches!(
            err,
            CheckoutError::Git { .. } | CheckoutError::Io(_)
        ));
    }
}
