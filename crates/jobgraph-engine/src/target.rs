//! Target selection: decide which jobs this run is for.

use async_trait::async_trait;
use glob::Pattern;
use jobgraph_config::OptimizerSettings;
use jobgraph_core::{
    ChangeDetector, Error, JobGraph, JobId, Result, RunParameters, TriggerKind,
};
use std::collections::BTreeSet;
use tracing::{debug, info};

use crate::retry::retrying;

/// What a target strategy may consult besides the graph.
pub struct TargetContext<'a> {
    pub params: &'a RunParameters,
    pub changes: &'a dyn ChangeDetector,
    /// Retry policy for predicate calls, shared with the optimizer.
    pub retry: OptimizerSettings,
}

/// Picks the ids this run is for. The selector closes the set afterwards.
#[async_trait]
pub trait TargetStrategy: Send + Sync {
    async fn select(&self, graph: &JobGraph, ctx: &TargetContext<'_>) -> Result<BTreeSet<JobId>>;
}

/// Every job in the graph.
pub struct AllTargets;

#[async_trait]
impl TargetStrategy for AllTargets {
    async fn select(&self, graph: &JobGraph, _ctx: &TargetContext<'_>) -> Result<BTreeSet<JobId>> {
        Ok(graph.ids().cloned().collect())
    }
}

/// Exactly the ids listed in `target_jobs`.
pub struct NamedTargets;

#[async_trait]
impl TargetStrategy for NamedTargets {
    async fn select(&self, graph: &JobGraph, ctx: &TargetContext<'_>) -> Result<BTreeSet<JobId>> {
        ctx.params
            .target_jobs
            .iter()
            .map(|name| {
                graph
                    .get(name)
                    .map(|job| job.id.clone())
                    .ok_or_else(|| {
                        Error::InvalidParameters(format!("target job '{}' does not exist", name))
                    })
            })
            .collect()
    }
}

/// Jobs with path patterns that match the change set.
pub struct ChangedTargets;

#[async_trait]
impl TargetStrategy for ChangedTargets {
    async fn select(&self, graph: &JobGraph, ctx: &TargetContext<'_>) -> Result<BTreeSet<JobId>> {
        let mut selected = BTreeSet::new();
        for job in graph.jobs() {
            let paths = job.optimization.input_patterns();
            if paths.is_empty() {
                continue;
            }
            let affected = retrying(&ctx.retry, &job.id, ctx.changes.name(), || {
                ctx.changes
                    .is_affected(job, &ctx.params.base_rev, &ctx.params.head_rev, paths)
            })
            .await?;
            if affected {
                selected.insert(job.id.clone());
            }
        }
        Ok(selected)
    }
}

/// Jobs whose metadata allows the current trigger and branch.
///
/// `run_on_pipeline_sources` must list the trigger kind. For anything but a
/// merge request, one of `run_on_git_branches` must be `all` or a glob that
/// matches the branch.
pub struct DefaultTargets;

#[async_trait]
impl TargetStrategy for DefaultTargets {
    async fn select(&self, graph: &JobGraph, ctx: &TargetContext<'_>) -> Result<BTreeSet<JobId>> {
        let source = ctx.params.pipeline_source.as_str();
        let branch = ctx.params.branch();

        let selected = graph
            .jobs()
            .filter(|job| {
                job.metadata_strings("run_on_pipeline_sources")
                    .iter()
                    .any(|s| s == source)
            })
            .filter(|job| {
                ctx.params.pipeline_source == TriggerKind::MergeRequestEvent
                    || job
                        .metadata_strings("run_on_git_branches")
                        .iter()
                        .any(|b| branch_matches(b, branch))
            })
            .map(|job| job.id.clone())
            .collect();
        Ok(selected)
    }
}

fn branch_matches(filter: &str, branch: &str) -> bool {
    filter == "all"
        || filter == branch
        || Pattern::new(filter).is_ok_and(|p| p.matches(branch))
}

/// Selects nothing; only `always_target` jobs run.
pub struct NoTargets;

#[async_trait]
impl TargetStrategy for NoTargets {
    async fn select(&self, _graph: &JobGraph, _ctx: &TargetContext<'_>) -> Result<BTreeSet<JobId>> {
        Ok(BTreeSet::new())
    }
}

/// The outcome of target selection.
#[derive(Debug, Clone)]
pub struct TargetSelection {
    /// Ids picked by the strategy plus `always_target` jobs.
    pub targets: BTreeSet<JobId>,
    /// The transitive dependency closure of `targets`.
    pub graph: JobGraph,
}

/// Run `strategy` over the full graph and close the result.
pub async fn select_targets(
    strategy: &dyn TargetStrategy,
    full: &JobGraph,
    ctx: &TargetContext<'_>,
) -> Result<TargetSelection> {
    let mut targets = strategy.select(full, ctx).await?;
    let picked = targets.len();

    targets.extend(
        full.jobs()
            .filter(|job| job.always_target())
            .map(|job| job.id.clone()),
    );
    debug!(
        picked,
        always = targets.len() - picked,
        "Added always-target jobs"
    );

    let graph = full.transitive_closure(&targets);
    info!(
        method = %ctx.params.target_jobs_method,
        targets = targets.len(),
        jobs = graph.len(),
        "Selected targets"
    );
    Ok(TargetSelection { targets, graph })
}
