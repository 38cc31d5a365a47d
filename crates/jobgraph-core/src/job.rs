//! Resolved jobs.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;

use crate::{Attributes, JobDeclaration, JobId, OptimizationPolicy};

/// A job with a global id and concrete dependency edges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub attributes: Attributes,
    #[serde(default)]
    pub metadata: Attributes,
    pub dependencies: BTreeSet<JobId>,
    #[serde(default)]
    pub optimization: OptimizationPolicy,
    pub origin_stage: String,
}

impl Job {
    /// Build a resolved job from its declaration and resolved dependency ids.
    pub fn from_declaration(declaration: JobDeclaration, dependencies: BTreeSet<JobId>) -> Self {
        Self {
            id: declaration.id(),
            attributes: declaration.attributes,
            metadata: declaration.metadata,
            dependencies,
            optimization: declaration.optimization,
            origin_stage: declaration.stage,
        }
    }

    pub fn always_target(&self) -> bool {
        self.metadata
            .get("always_target")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// A metadata entry read as a list of strings; a single string counts as
    /// a one-element list.
    pub fn metadata_strings(&self, key: &str) -> Vec<String> {
        match self.metadata.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            Some(Value::String(s)) => vec![s.clone()],
            _ => Vec::new(),
        }
    }
}

/// Content digest of a job and, transitively, of everything it depends on.
///
/// Two runs produce the same digest for a job only if the job definition and
/// all of its upstream definitions are identical, which is what makes a
/// prior result safe to reuse.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display)]
#[display("{_0}")]
#[serde(transparent)]
pub struct JobDigest(String);

impl JobDigest {
    /// Compute the digest of `job` given the digests of its dependencies.
    ///
    /// `dependency_digests` must be in the same order as `job.dependencies`.
    pub fn compute<'a>(
        job: &Job,
        dependency_digests: impl IntoIterator<Item = &'a JobDigest>,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(job.id.as_str().as_bytes());
        hasher.update(b"\n");
        // BTreeMap-backed values serialize with sorted keys.
        let definition = serde_json::json!({
            "attributes": job.attributes,
            "optimization": job.optimization,
        });
        hasher.update(definition.to_string().as_bytes());
        for digest in dependency_digests {
            hasher.update(b"\n");
            hasher.update(digest.0.as_bytes());
        }
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}
