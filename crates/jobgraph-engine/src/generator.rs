//! The generation run: load, assemble, select targets, optimize.

use jobgraph_config::{ConfigRoot, VariableContext};
use jobgraph_core::{
    ChangeDetector, Error, HistoryIndex, JobDeclaration, JobGraph, JobId, OptimizedGraph, Result,
    RunParameters, StageConfig,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::assembler::assemble;
use crate::emit::{Artifacts, RunOutput, emit};
use crate::optimizer::Optimizer;
use crate::registry::Registry;
use crate::target::{TargetContext, TargetSelection, select_targets};
use crate::transforms::{TransformContext, run_transforms};

/// Every graph a run produces, from the full graph down to the optimized one.
#[derive(Debug, Clone)]
pub struct Generation {
    pub params: RunParameters,
    pub full: JobGraph,
    pub targets: BTreeSet<JobId>,
    pub target_graph: JobGraph,
    pub optimized: OptimizedGraph,
}

impl Generation {
    /// Render the pipeline documents and debug artifacts.
    pub fn artifacts(&self, root: &ConfigRoot) -> Result<Artifacts> {
        emit(
            &RunOutput {
                params: &self.params,
                full: &self.full,
                targets: &self.targets,
                target_graph: &self.target_graph,
                optimized: &self.optimized,
            },
            &root.graph.emit,
        )
    }
}

pub struct Generator {
    root: Arc<ConfigRoot>,
    registry: Arc<Registry>,
    changes: Arc<dyn ChangeDetector>,
    history: Arc<dyn HistoryIndex>,
}

impl Generator {
    pub fn new(
        root: ConfigRoot,
        registry: Registry,
        changes: Arc<dyn ChangeDetector>,
        history: Arc<dyn HistoryIndex>,
    ) -> Self {
        Self {
            root: Arc::new(root),
            registry: Arc::new(registry),
            changes,
            history,
        }
    }

    pub fn root(&self) -> &ConfigRoot {
        &self.root
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Load and transform every stage, one blocking task per stage.
    ///
    /// The result is ordered by stage name whatever order the tasks finish
    /// in. The first failing stage aborts the load.
    pub async fn load_declarations(&self, params: &RunParameters) -> Result<Vec<JobDeclaration>> {
        let params = Arc::new(params.clone());
        let mut tasks = JoinSet::new();
        for stage in &self.root.stages {
            let stage = stage.clone();
            let root = Arc::clone(&self.root);
            let registry = Arc::clone(&self.registry);
            let params = Arc::clone(&params);
            tasks.spawn_blocking(move || load_stage(&registry, &root, &stage, &params));
        }

        let mut loaded = Vec::with_capacity(self.root.stages.len());
        while let Some(joined) = tasks.join_next().await {
            let stage = joined
                .map_err(|e| Error::Io(std::io::Error::other(format!("stage task failed: {e}"))))??;
            loaded.push(stage);
        }
        loaded.sort_by(|a, b| a.0.cmp(&b.0));

        let declarations: Vec<JobDeclaration> =
            loaded.into_iter().flat_map(|(_, jobs)| jobs).collect();
        info!(
            stages = self.root.stages.len(),
            jobs = declarations.len(),
            "Loaded stages"
        );
        Ok(declarations)
    }

    /// The full job graph for `params`.
    pub async fn full_graph(&self, params: &RunParameters) -> Result<JobGraph> {
        assemble(self.load_declarations(params).await?)
    }

    /// Build the full graph and select the targets of the run.
    pub async fn select(&self, params: &RunParameters) -> Result<(JobGraph, TargetSelection)> {
        params.check()?;
        info!(
            id = %params.id(),
            head = %params.head_rev,
            source = %params.pipeline_source,
            method = %params.target_jobs_method,
            "Generating job graph"
        );

        let strategy = self.registry.target(&params.target_jobs_method)?;
        let full = self.full_graph(params).await?;

        let ctx = TargetContext {
            params,
            changes: self.changes.as_ref(),
            retry: self.root.graph.optimizer,
        };
        let selection = select_targets(strategy.as_ref(), &full, &ctx).await?;
        Ok((full, selection))
    }

    /// Run every phase up to optimization.
    pub async fn generate(&self, params: RunParameters) -> Result<Generation> {
        let (full, selection) = self.select(&params).await?;

        let optimizer = Optimizer::new(
            self.root.graph.optimizer,
            Arc::clone(&self.changes),
            Arc::clone(&self.history),
        );
        let optimized = optimizer
            .optimize(&selection.graph, &selection.targets, &params)
            .await?;

        Ok(Generation {
            params,
            full,
            targets: selection.targets,
            target_graph: selection.graph,
            optimized,
        })
    }
}

fn load_stage(
    registry: &Registry,
    root: &ConfigRoot,
    stage: &StageConfig,
    params: &RunParameters,
) -> Result<(String, Vec<JobDeclaration>)> {
    let loader = registry.loader(&stage.loader)?;
    let jobs = loader.load(stage, &root.graph)?;
    debug!(stage = %stage.name, loader = %stage.loader, jobs = jobs.len(), "Loaded stage");

    let variables = VariableContext::from_parameters(params, &root.graph.variables);
    let ctx = TransformContext {
        params,
        config: &root.graph,
        variables: &variables,
    };
    let jobs = run_transforms(registry, stage, &ctx, jobs)?;
    Ok((stage.name.clone(), jobs))
}
