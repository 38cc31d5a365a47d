//! Error types for jobgraph.

use thiserror::Error;

use crate::JobId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid declaration in stage '{stage}'{}: {message}", job_suffix(.job))]
    Declaration {
        stage: String,
        job: Option<String>,
        message: String,
    },

    #[error("transform '{transform}' failed in stage '{stage}'{}: {message}", job_suffix(.job))]
    Transform {
        stage: String,
        job: Option<String>,
        transform: String,
        message: String,
    },

    #[error("job '{job}' needs '{reference}', which {}", describe_matches(.matches))]
    UnresolvedDependency {
        job: JobId,
        reference: String,
        matches: Vec<JobId>,
    },

    #[error("dependency cycle detected: {}", join_ids(.path, " -> "))]
    Cycle { path: Vec<JobId> },

    #[error("duplicate job: {0}")]
    DuplicateJob(JobId),

    #[error("unknown target method: {0}")]
    UnknownTargetMethod(String),

    #[error("unknown {kind}: {name}")]
    UnknownComponent { kind: &'static str, name: String },

    #[error("{predicate} predicate failed for job '{job}': {message}")]
    PredicateService {
        predicate: &'static str,
        job: JobId,
        message: String,
    },

    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("cannot emit pipeline: {0}")]
    Emit(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether retrying the failed operation could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::PredicateService { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;

fn job_suffix(job: &Option<String>) -> String {
    job.as_ref()
        .map(|j| format!(", job '{}'", j))
        .unwrap_or_default()
}

fn describe_matches(matches: &[JobId]) -> String {
    if matches.is_empty() {
        "matches no job".to_string()
    } else {
        format!("is ambiguous (matches {})", join_ids(matches, ", "))
    }
}

fn join_ids(ids: &[JobId], sep: &str) -> String {
    ids.iter().map(|id| id.as_str()).collect::<Vec<_>>().join(sep)
}
