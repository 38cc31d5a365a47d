//! Reject job definitions that cannot mean anything sensible.

use jobgraph_core::JobDeclaration;
use serde_json::Value;

use super::{Transform, TransformContext, TransformFailure, TransformResult};

/// Rejects:
/// - jobs with both `script` and `trigger`
/// - a non-boolean `allow_failure`
/// - manual jobs (`when "manual"`) that are also `always_target`
pub struct Validate;

impl Transform for Validate {
    fn apply(&self, _ctx: &TransformContext<'_>, jobs: Vec<JobDeclaration>) -> TransformResult {
        for job in &jobs {
            check(job).map_err(|message| TransformFailure::job(job, message))?;
        }
        Ok(jobs)
    }
}

fn check(job: &JobDeclaration) -> Result<(), &'static str> {
    if job.attribute("script").is_some() && job.attribute("trigger").is_some() {
        return Err("a job cannot have both script and trigger");
    }
    if let Some(value) = job.attribute("allow_failure") {
        if !value.is_boolean() {
            return Err("allow_failure must be #true or #false");
        }
    }
    let manual = job.attribute("when") == Some(&Value::String("manual".to_string()));
    if manual && job.metadata_flag("always_target") {
        return Err("a manual job cannot be always_target");
    }
    Ok(())
}
