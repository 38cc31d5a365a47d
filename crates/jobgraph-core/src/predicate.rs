//! Collaborators consulted by the optimizer.
//!
//! Both are read-only queries against something outside the engine (a git
//! checkout, a results index). Implementations report failures as
//! [`Error::PredicateService`](crate::Error::PredicateService); the optimizer
//! retries those with backoff and then aborts the run.

use async_trait::async_trait;

use crate::{Job, JobDigest, Replacement, Result};

/// Answers "could this job's inputs have changed between two revisions?"
#[async_trait]
pub trait ChangeDetector: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Whether any file changed between `base` and `head` matches one of
    /// `patterns`.
    async fn is_affected(&self, job: &Job, base: &str, head: &str, patterns: &[String])
    -> Result<bool>;
}

/// Answers "does a prior completed run already provide this job's result?"
#[async_trait]
pub trait HistoryIndex: Send + Sync {
    fn name(&self) -> &'static str;

    /// Look up a prior result for `job`. `digest` covers the job definition
    /// and everything upstream of it.
    async fn lookup(&self, job: &Job, digest: &JobDigest) -> Result<Option<Replacement>>;
}
