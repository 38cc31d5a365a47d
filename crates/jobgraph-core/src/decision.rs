//! Optimization decisions and the optimized graph.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{Error, JobGraph, JobId, Result};

/// Why a job was kept or replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum DecisionReason {
    /// The job's policy is `never`.
    NeverOptimize,
    /// Listed in `do_not_optimize`, or a target while target optimization is off.
    DoNotOptimize,
    /// Change detection reported the job's inputs as changed.
    Affected,
    /// A consumer that must run in this run needs this job to run too.
    RequiredBy { consumer: JobId },
    /// Unaffected, but no prior result could be found.
    NoPriorResult,
    /// A prior result satisfies the job.
    SatisfiedByHistory,
}

/// An externally satisfied equivalent of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replacement {
    pub job_id: JobId,
    /// Opaque pointer understood by the CI platform, e.g. a prior pipeline id.
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptimizationDecision {
    pub job_id: JobId,
    pub kept: bool,
    #[serde(flatten)]
    pub reason: DecisionReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub replacement: Option<Replacement>,
}

impl OptimizationDecision {
    pub fn keep(job_id: JobId, reason: DecisionReason) -> Self {
        Self {
            job_id,
            kept: true,
            reason,
            replacement: None,
        }
    }

    pub fn replace(job_id: JobId, reference: impl Into<String>) -> Self {
        Self {
            replacement: Some(Replacement {
                job_id: job_id.clone(),
                reference: reference.into(),
            }),
            job_id,
            kept: false,
            reason: DecisionReason::SatisfiedByHistory,
        }
    }

    /// Whether this decision obliges the job's dependencies to run too.
    ///
    /// A job kept for lack of a prior result needs its inputs produced in this
    /// run, and so does every job it forces in turn.
    pub fn forces_dependencies(&self) -> bool {
        matches!(
            self.reason,
            DecisionReason::NoPriorResult | DecisionReason::RequiredBy { .. }
        )
    }
}

/// The kept part of the target graph, plus a decision for every target-graph job.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizedGraph {
    /// Kept jobs and the edges among them.
    pub graph: JobGraph,
    /// One decision per job of the target graph, kept or not.
    pub decisions: BTreeMap<JobId, OptimizationDecision>,
}

impl OptimizedGraph {
    pub fn new(graph: JobGraph, decisions: BTreeMap<JobId, OptimizationDecision>) -> Self {
        Self { graph, decisions }
    }

    pub fn replacement(&self, id: &str) -> Option<&Replacement> {
        self.decisions.get(id).and_then(|d| d.replacement.as_ref())
    }

    pub fn replacements(&self) -> impl Iterator<Item = &Replacement> {
        self.decisions.values().filter_map(|d| d.replacement.as_ref())
    }

    /// Dependencies of a kept job that are replaced by prior results.
    pub fn external_dependencies(&self, id: &str) -> Vec<&Replacement> {
        self.graph
            .get(id)
            .map(|job| {
                job.dependencies
                    .iter()
                    .filter_map(|dep| self.replacement(dep.as_str()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Verify that every dependency of every kept job is either kept or
    /// replaced.
    pub fn check_closure(&self) -> Result<()> {
        for job in self.graph.jobs() {
            for dep in &job.dependencies {
                if !self.graph.contains(dep.as_str()) && self.replacement(dep.as_str()).is_none() {
                    return Err(Error::UnresolvedDependency {
                        job: job.id.clone(),
                        reference: dep.to_string(),
                        matches: vec![],
                    });
                }
            }
        }
        Ok(())
    }
}
