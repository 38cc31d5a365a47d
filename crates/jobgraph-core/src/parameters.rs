//! Run parameters: everything about the triggering event that influences
//! target selection and optimization.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::{Error, JobId, Result};

/// The all-zero revision git reports as the "before" of a new branch.
pub const NULL_REVISION: &str = "0000000000000000000000000000000000000000";

/// True when `rev` is not a usable revision to diff against.
pub fn is_null_revision(rev: &str) -> bool {
    rev.is_empty() || rev == NULL_REVISION
}

/// What started the pipeline, in the CI platform's vocabulary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    #[default]
    Push,
    Web,
    Schedule,
    Api,
    MergeRequestEvent,
    Trigger,
    Pipeline,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerKind::Push => "push",
            TriggerKind::Web => "web",
            TriggerKind::Schedule => "schedule",
            TriggerKind::Api => "api",
            TriggerKind::MergeRequestEvent => "merge_request_event",
            TriggerKind::Trigger => "trigger",
            TriggerKind::Pipeline => "pipeline",
        }
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "push" => Ok(TriggerKind::Push),
            "web" => Ok(TriggerKind::Web),
            "schedule" => Ok(TriggerKind::Schedule),
            "api" => Ok(TriggerKind::Api),
            "merge_request_event" => Ok(TriggerKind::MergeRequestEvent),
            "trigger" => Ok(TriggerKind::Trigger),
            "pipeline" => Ok(TriggerKind::Pipeline),
            other => Err(Error::InvalidParameters(format!(
                "unknown pipeline source: {}",
                other
            ))),
        }
    }
}

/// Whether the head ref is a protected branch or tag.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefProtection {
    #[default]
    Protected,
    Unprotected,
}

impl RefProtection {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefProtection::Protected => "protected",
            RefProtection::Unprotected => "unprotected",
        }
    }

    pub fn is_protected(&self) -> bool {
        matches!(self, RefProtection::Protected)
    }
}

impl FromStr for RefProtection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "protected" | "true" => Ok(RefProtection::Protected),
            "unprotected" | "false" => Ok(RefProtection::Unprotected),
            other => Err(Error::InvalidParameters(format!(
                "unknown ref protection: {}",
                other
            ))),
        }
    }
}

/// Immutable description of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunParameters {
    pub base_repository: String,
    pub head_repository: String,
    /// Revision to diff against; empty or [`NULL_REVISION`] when unknown.
    pub base_rev: String,
    pub head_rev: String,
    pub head_ref: String,
    #[serde(default)]
    pub head_tag: String,
    #[serde(default)]
    pub head_ref_protection: RefProtection,
    #[serde(default)]
    pub pipeline_source: TriggerKind,
    pub target_jobs_method: String,
    /// Explicit targets for the `names` method.
    #[serde(default)]
    pub target_jobs: Vec<String>,
    #[serde(default = "default_true")]
    pub optimize_target_jobs: bool,
    #[serde(default)]
    pub do_not_optimize: Vec<String>,
    #[serde(default)]
    pub owner: String,
    /// Unix timestamp, seconds.
    #[serde(default)]
    pub build_date: i64,
}

fn default_true() -> bool {
    true
}

impl Default for RunParameters {
    fn default() -> Self {
        Self {
            base_repository: String::new(),
            head_repository: String::new(),
            base_rev: String::new(),
            head_rev: String::new(),
            head_ref: String::new(),
            head_tag: String::new(),
            head_ref_protection: RefProtection::default(),
            pipeline_source: TriggerKind::default(),
            target_jobs_method: "default".to_string(),
            target_jobs: Vec::new(),
            optimize_target_jobs: true,
            do_not_optimize: Vec::new(),
            owner: "nobody".to_string(),
            build_date: 0,
        }
    }
}

impl RunParameters {
    /// Short stable identifier: the first 12 hex characters of the SHA-256
    /// of the parameters as canonical (key-sorted) JSON.
    pub fn id(&self) -> String {
        // serde_json::Value keeps object keys sorted.
        let canonical = serde_json::to_value(self)
            .map(|v| v.to_string())
            .unwrap_or_default();
        let digest = Sha256::digest(canonical.as_bytes());
        hex::encode(digest)[..12].to_string()
    }

    /// The branch name, with any `refs/heads/` prefix removed.
    pub fn branch(&self) -> &str {
        self.head_ref
            .strip_prefix("refs/heads/")
            .unwrap_or(&self.head_ref)
    }

    /// Validate the fields that later stages rely on.
    pub fn check(&self) -> Result<()> {
        if self.head_rev.is_empty() {
            return Err(Error::InvalidParameters("head_rev is required".into()));
        }
        if self.target_jobs_method.is_empty() {
            return Err(Error::InvalidParameters(
                "target_jobs_method is required".into(),
            ));
        }
        for (field, ids) in [
            ("target_jobs", &self.target_jobs),
            ("do_not_optimize", &self.do_not_optimize),
        ] {
            if let Some(bad) = ids.iter().find(|id| id.parse::<JobId>().is_err()) {
                return Err(Error::InvalidParameters(format!(
                    "{} entry '{}' is not a stage/name job id",
                    field, bad
                )));
            }
        }
        Ok(())
    }

    pub fn from_json(input: &str) -> Result<Self> {
        let params: RunParameters = serde_json::from_str(input)?;
        params.check()?;
        Ok(params)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
