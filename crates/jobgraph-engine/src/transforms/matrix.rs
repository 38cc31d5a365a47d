//! Split one job into a job per combination of matrix values.

use jobgraph_core::JobDeclaration;
use serde_json::{Map, Value};

use super::{Transform, TransformContext, TransformFailure, TransformResult};

const MATRIX: &str = "matrix";

/// Expands `matrix { KEY "a" "b" }` into one job per combination.
///
/// Keys are combined in sorted order and values in declared order. Each job
/// is named `<name>-<value>...` and gets the chosen values in `variables`.
pub struct Matrix;

impl Transform for Matrix {
    fn apply(&self, _ctx: &TransformContext<'_>, jobs: Vec<JobDeclaration>) -> TransformResult {
        let mut out = Vec::with_capacity(jobs.len());
        for job in jobs {
            match job.attribute(MATRIX).cloned() {
                None => out.push(job),
                Some(matrix) => {
                    let axes = parse_axes(&job, &matrix)?;
                    out.extend(expand(job, &axes));
                }
            }
        }
        Ok(out)
    }
}

fn parse_axes(
    job: &JobDeclaration,
    matrix: &Value,
) -> Result<Vec<(String, Vec<String>)>, TransformFailure> {
    let Value::Object(map) = matrix else {
        return Err(TransformFailure::job(job, "matrix must be a block of KEY values..."));
    };
    if map.is_empty() {
        return Err(TransformFailure::job(job, "matrix has no keys"));
    }

    let mut axes = Vec::with_capacity(map.len());
    for (key, values) in map {
        let values: Vec<String> = match values {
            Value::String(s) => vec![s.clone()],
            Value::Array(items) => items
                .iter()
                .map(|v| v.as_str().map(String::from))
                .collect::<Option<_>>()
                .ok_or_else(|| {
                    TransformFailure::job(job, format!("matrix key {} must list strings", key))
                })?,
            _ => {
                return Err(TransformFailure::job(
                    job,
                    format!("matrix key {} must list strings", key),
                ));
            }
        };
        if values.is_empty() {
            return Err(TransformFailure::job(job, format!("matrix key {} has no values", key)));
        }
        if let Some(bad) = values.iter().find(|v| v.is_empty() || v.contains('/')) {
            return Err(TransformFailure::job(
                job,
                format!("matrix value '{}' cannot be used in a job name", bad),
            ));
        }
        axes.push((key.clone(), values));
    }
    Ok(axes)
}

fn expand(job: JobDeclaration, axes: &[(String, Vec<String>)]) -> Vec<JobDeclaration> {
    let mut combinations: Vec<Vec<(&str, &str)>> = vec![Vec::new()];
    for (key, values) in axes {
        combinations = combinations
            .into_iter()
            .flat_map(|prefix| {
                values.iter().map(move |v| {
                    let mut next = prefix.clone();
                    next.push((key.as_str(), v.as_str()));
                    next
                })
            })
            .collect();
    }

    let mut base = job.attributes.clone();
    base.remove(MATRIX);

    combinations
        .into_iter()
        .map(|combo| {
            let suffix: Vec<&str> = combo.iter().map(|(_, v)| *v).collect();
            let name = format!("{}-{}", job.name, suffix.join("-"));

            let mut attributes = base.clone();
            let mut variables = match attributes.remove("variables") {
                Some(Value::Object(vars)) => vars,
                _ => Map::new(),
            };
            for (key, value) in &combo {
                variables.insert(key.to_string(), Value::String(value.to_string()));
            }
            attributes.insert("variables".to_string(), Value::Object(variables));

            job.clone().with_name(name).with_attributes(attributes)
        })
        .collect()
}
