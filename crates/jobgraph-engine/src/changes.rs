//! Change detection: which files differ between the base and head revisions.

use async_trait::async_trait;
use glob::{MatchOptions, Pattern};
use jobgraph_core::{ChangeDetector, Error, Job, Result, is_null_revision};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Whether any changed file matches any of `patterns`.
///
/// `*` stays within one path segment; `**` crosses directories.
pub fn paths_match(changed: &[String], patterns: &[String]) -> bool {
    let compiled: Vec<Pattern> = patterns
        .iter()
        .filter_map(|p| match Pattern::new(p) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                warn!(pattern = %p, error = %e, "Ignoring invalid path pattern");
                None
            }
        })
        .collect();
    changed
        .iter()
        .any(|file| compiled.iter().any(|p| p.matches_with(file, MATCH_OPTIONS)))
}

type ChangeCache = Mutex<HashMap<(String, String), Arc<OnceCell<Arc<Vec<String>>>>>>;

/// Asks git for the files changed between two revisions.
///
/// The diff for a given (base, head) pair is computed once and shared by
/// every job that asks about it, including concurrent callers.
pub struct GitChangeDetector {
    repository: PathBuf,
    cache: ChangeCache,
}

impl GitChangeDetector {
    pub fn new(repository: impl Into<PathBuf>) -> Self {
        Self {
            repository: repository.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    async fn changed_files(&self, job: &Job, base: &str, head: &str) -> Result<Arc<Vec<String>>> {
        let cell = {
            let mut cache = self
                .cache
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            Arc::clone(
                cache
                    .entry((base.to_string(), head.to_string()))
                    .or_default(),
            )
        };

        cell.get_or_try_init(|| async {
            let output = Command::new("git")
                .arg("-C")
                .arg(&self.repository)
                .args(["diff", "--name-only", base, head])
                .output()
                .await
                .map_err(|e| self.failure(job, format!("cannot run git: {}", e)))?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                return Err(self.failure(
                    job,
                    format!("git diff {}..{} failed: {}", base, head, stderr.trim()),
                ));
            }

            let files: Vec<String> = String::from_utf8_lossy(&output.stdout)
                .lines()
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect();
            debug!(base, head, files = files.len(), "Computed change set");
            Ok(Arc::new(files))
        })
        .await
        .cloned()
    }

    fn failure(&self, job: &Job, message: String) -> Error {
        Error::PredicateService {
            predicate: self.name(),
            job: job.id.clone(),
            message,
        }
    }
}

#[async_trait]
impl ChangeDetector for GitChangeDetector {
    fn name(&self) -> &'static str {
        "git"
    }

    async fn is_affected(
        &self,
        job: &Job,
        base: &str,
        head: &str,
        patterns: &[String],
    ) -> Result<bool> {
        if is_null_revision(base) {
            return Ok(true);
        }
        let changed = self.changed_files(job, base, head).await?;
        Ok(paths_match(&changed, patterns))
    }
}

/// A fixed list of changed files, for replays and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticChangeSet {
    files: Vec<String>,
}

impl StaticChangeSet {
    pub fn new(files: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            files: files.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl ChangeDetector for StaticChangeSet {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn is_affected(
        &self,
        _job: &Job,
        _base: &str,
        _head: &str,
        patterns: &[String],
    ) -> Result<bool> {
        Ok(paths_match(&self.files, patterns))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobgraph_core::{JobDeclaration, NULL_REVISION};
    use std::collections::BTreeSet;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    fn job() -> Job {
        Job::from_declaration(JobDeclaration::new("build", "compile"), BTreeSet::new())
    }

    #[test]
    fn test_paths_match() {
        let changed = strings(&["src/engine/lib.rs", "README.md"]);
        assert!(paths_match(&changed, &strings(&["src/**"])));
        assert!(paths_match(&changed, &strings(&["*.md"])));
        assert!(!paths_match(&changed, &strings(&["src/*.rs"])));
        assert!(!paths_match(&changed, &strings(&["docs/**"])));
        assert!(!paths_match(&[], &strings(&["**"])));
    }

    #[tokio::test]
    async fn test_static_change_set() {
        let changes = StaticChangeSet::new(["Cargo.toml"]);
        assert!(
            changes
                .is_affected(&job(), "a", "b", &strings(&["Cargo.*"]))
                .await
                .unwrap()
        );
        assert!(
            !changes
                .is_affected(&job(), "a", "b", &strings(&["src/**"]))
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_null_base_is_affected() {
        let detector = GitChangeDetector::new("/nonexistent");
        let patterns = strings(&["nothing/**"]);
        assert!(
            detector
                .is_affected(&job(), NULL_REVISION, "head", &patterns)
                .await
                .unwrap()
        );
        assert!(detector.is_affected(&job(), "", "head", &patterns).await.unwrap());
    }

    #[tokio::test]
    async fn test_git_failure_is_predicate_error() {
        let dir = tempfile::tempdir().unwrap();
        let detector = GitChangeDetector::new(dir.path());
        let err = detector
            .is_affected(&job(), "base", "head", &strings(&["**"]))
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(matches!(err, Error::PredicateService { predicate: "git", .. }));
    }
}
