//! Substitute run variables into job attributes.

use jobgraph_config::VariableContext;
use jobgraph_core::JobDeclaration;
use serde_json::Value;

use super::{Transform, TransformContext, TransformFailure, TransformResult};

/// Namespaces owned by the engine. `${NAME}` without a namespace belongs to
/// the CI platform and is left alone.
const NAMESPACES: [&str; 4] = ["git", "pipeline", "build", "vars"];

/// Replaces `${git.*}`, `${pipeline.*}`, `${build.*}` and `${vars.*}` in
/// every string attribute. An unknown variable in one of those namespaces is
/// an error.
pub struct Interpolate;

impl Transform for Interpolate {
    fn apply(&self, ctx: &TransformContext<'_>, jobs: Vec<JobDeclaration>) -> TransformResult {
        jobs.into_iter()
            .map(|job| -> Result<JobDeclaration, TransformFailure> {
                let mut attributes = job.attributes.clone();
                for value in attributes.values_mut() {
                    interpolate_value(ctx.variables, value)
                        .map_err(|message| TransformFailure::job(&job, message))?;
                }
                Ok(job.with_attributes(attributes))
            })
            .collect()
    }
}

fn interpolate_value(vars: &VariableContext, value: &mut Value) -> Result<(), String> {
    match value {
        Value::String(s) => {
            if let Some(name) = vars
                .unresolved(s)
                .into_iter()
                .find(|name| is_engine_variable(name))
            {
                return Err(format!("unknown variable ${{{}}}", name));
            }
            *s = vars.interpolate(s);
        }
        Value::Array(items) => {
            for item in items {
                interpolate_value(vars, item)?;
            }
        }
        Value::Object(map) => {
            for item in map.values_mut() {
                interpolate_value(vars, item)?;
            }
        }
        _ => {}
    }
    Ok(())
}

fn is_engine_variable(name: &str) -> bool {
    name.split_once('.')
        .map(|(ns, _)| NAMESPACES.contains(&ns))
        .unwrap_or(false)
}
