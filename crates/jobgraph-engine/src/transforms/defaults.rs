//! Fill in the selection metadata every job needs.

use jobgraph_core::{Attributes, JobDeclaration};
use serde_json::{Value, json};

use super::{Transform, TransformContext, TransformResult};

/// Fills `always_target`, `run_on_pipeline_sources` and
/// `run_on_git_branches` when a job leaves them out.
///
/// Jobs with `schedules` in their metadata also run on scheduled pipelines.
pub struct SetDefaults;

impl Transform for SetDefaults {
    fn apply(&self, _ctx: &TransformContext<'_>, jobs: Vec<JobDeclaration>) -> TransformResult {
        Ok(jobs
            .into_iter()
            .map(|job| {
                let metadata = with_defaults(&job.metadata);
                job.with_metadata(metadata)
            })
            .collect())
    }
}

fn with_defaults(metadata: &Attributes) -> Attributes {
    let mut out = metadata.clone();
    out.entry("always_target".to_string())
        .or_insert(Value::Bool(false));

    let mut sources = vec!["push", "web"];
    if metadata.contains_key("schedules") {
        sources.push("schedule");
    }
    out.entry("run_on_pipeline_sources".to_string())
        .or_insert_with(|| json!(sources));
    out.entry("run_on_git_branches".to_string())
        .or_insert_with(|| json!(["all"]));
    out
}
