//! Job identifiers.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;

/// A globally unique job identifier of the form `stage/name`.
///
/// Ordering is lexicographic on the full string, which keeps every map keyed
/// by `JobId` in a stable order across runs.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display,
)]
#[display("{_0}")]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Build the id of job `name` declared in `stage`.
    pub fn new(stage: &str, name: &str) -> Self {
        Self(format!("{}/{}", stage, name))
    }

    /// The stage part of the id.
    pub fn stage(&self) -> &str {
        self.0.split_once('/').map(|(s, _)| s).unwrap_or_default()
    }

    /// The job name within its stage.
    pub fn name(&self) -> &str {
        self.0.split_once('/').map(|(_, n)| n).unwrap_or(&self.0)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for JobId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for JobId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((stage, name)) if !stage.is_empty() && !name.is_empty() => {
                Ok(Self(s.to_string()))
            }
            _ => Err(format!("job id must look like 'stage/name': {}", s)),
        }
    }
}
