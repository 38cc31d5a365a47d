//! Resolve values keyed by a run attribute.
//!
//! A value written as
//!
//! ```kdl
//! tags {
//!     by-branch {
//!         main "linux-prod"
//!         "release/*" "linux-release"
//!         default "linux-dev"
//!     }
//! }
//! ```
//!
//! is replaced by the alternative that matches the run's branch. Alternatives
//! may themselves be keyed by another attribute.

use glob::Pattern;
use jobgraph_core::{Attributes, JobDeclaration, RunParameters};
use serde_json::{Map, Value};

use super::{Transform, TransformContext, TransformFailure, TransformResult};

const PREFIX: &str = "by-";
const DEFAULT: &str = "default";

/// Evaluates every `by-<attribute>` map in a job's attributes and metadata.
///
/// The attribute is looked up in the run parameters (`branch`, `head-ref`,
/// `tag`, `pipeline-source`, `head-ref-protection`, `owner`) and then among
/// the job's own string attributes. An exact key wins; otherwise exactly one
/// glob key may match, and `default` applies when none does.
pub struct ResolveKeyedBy;

impl Transform for ResolveKeyedBy {
    fn apply(&self, ctx: &TransformContext<'_>, jobs: Vec<JobDeclaration>) -> TransformResult {
        jobs.into_iter()
            .map(|job| -> Result<JobDeclaration, TransformFailure> {
                let lookup = |name: &str| {
                    run_attribute(ctx.params, name)
                        .or_else(|| job.attribute(name).and_then(Value::as_str).map(String::from))
                };

                let attributes = resolve_all(&job.attributes, &lookup)
                    .map_err(|message| TransformFailure::job(&job, message))?;
                let metadata = resolve_all(&job.metadata, &lookup)
                    .map_err(|message| TransformFailure::job(&job, message))?;
                Ok(job.with_attributes(attributes).with_metadata(metadata))
            })
            .collect()
    }
}

fn run_attribute(params: &RunParameters, name: &str) -> Option<String> {
    let value = match name {
        "branch" => params.branch().to_string(),
        "head-ref" => params.head_ref.clone(),
        "tag" => params.head_tag.clone(),
        "pipeline-source" => params.pipeline_source.as_str().to_string(),
        "head-ref-protection" => params.head_ref_protection.as_str().to_string(),
        "owner" => params.owner.clone(),
        _ => return None,
    };
    Some(value)
}

fn resolve_all(
    fields: &Attributes,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<Attributes, String> {
    fields
        .iter()
        .map(|(key, value)| {
            resolve(value, lookup)
                .map(|resolved| (key.clone(), resolved))
                .map_err(|message| format!("{}: {}", key, message))
        })
        .collect()
}

/// Resolve `value` and, recursively, everything inside it.
fn resolve(value: &Value, lookup: &dyn Fn(&str) -> Option<String>) -> Result<Value, String> {
    let mut value = value.clone();
    while let Some((attribute, alternatives)) = keyed(&value) {
        value = choose(attribute, alternatives, lookup)?.clone();
    }
    match value {
        Value::Object(map) => map
            .into_iter()
            .map(|(k, v)| resolve(&v, lookup).map(|v| (k, v)))
            .collect::<Result<Map<String, Value>, String>>()
            .map(Value::Object),
        Value::Array(items) => items
            .iter()
            .map(|v| resolve(v, lookup))
            .collect::<Result<Vec<_>, String>>()
            .map(Value::Array),
        other => Ok(other),
    }
}

/// `Some((attribute, alternatives))` when `value` is a single `by-*` map.
fn keyed(value: &Value) -> Option<(&str, &Map<String, Value>)> {
    let Value::Object(map) = value else {
        return None;
    };
    if map.len() != 1 {
        return None;
    }
    let (key, alternatives) = map.iter().next()?;
    let attribute = key.strip_prefix(PREFIX)?;
    alternatives.as_object().map(|alts| (attribute, alts))
}

fn choose<'a>(
    attribute: &str,
    alternatives: &'a Map<String, Value>,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<&'a Value, String> {
    if alternatives.len() == 1 && alternatives.contains_key(DEFAULT) {
        return Err(format!(
            "{PREFIX}{attribute} is unnecessary with only a default alternative"
        ));
    }

    let Some(key) = lookup(attribute) else {
        return alternatives
            .get(DEFAULT)
            .ok_or_else(|| format!("no attribute '{attribute}' and no default alternative"));
    };

    if let Some(exact) = alternatives.get(&key) {
        return Ok(exact);
    }
    let matches: Vec<(&String, &Value)> = alternatives
        .iter()
        .filter(|(pattern, _)| pattern.as_str() != DEFAULT)
        .filter(|(pattern, _)| Pattern::new(pattern).is_ok_and(|p| p.matches(&key)))
        .collect();
    match matches.as_slice() {
        [(_, value)] => Ok(*value),
        [] => alternatives.get(DEFAULT).ok_or_else(|| {
            format!("no alternative for {attribute} '{key}' and no default")
        }),
        many => Err(format!(
            "{attribute} '{key}' matches several alternatives: {}",
            many.iter()
                .map(|(pattern, _)| pattern.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transforms::test_support::*;
    use jobgraph_config::GraphConfig;
    use jobgraph_core::TriggerKind;
    use serde_json::json;

    fn on_branch(head_ref: &str) -> Fixture {
        Fixture::with(
            RunParameters {
                head_ref: head_ref.to_string(),
                pipeline_source: TriggerKind::Web,
                ..Default::default()
            },
            GraphConfig::default(),
        )
    }

    fn tags() -> JobDeclaration {
        job(
            "build",
            json!({
                "script": "make",
                "tags": {"by-branch": {
                    "main": "linux-prod",
                    "release/*": "linux-release",
                    "default": "linux-dev",
                }},
            }),
        )
    }

    fn resolved_tags(head_ref: &str) -> Value {
        let fixture = on_branch(head_ref);
        let out = ResolveKeyedBy.apply(&fixture.ctx(), vec![tags()]).unwrap();
        out[0].attribute("tags").cloned().unwrap()
    }

    #[test]
    fn test_exact_glob_and_default() {
        assert_eq!(resolved_tags("refs/heads/main"), json!("linux-prod"));
        assert_eq!(resolved_tags("refs/heads/release/1.2"), json!("linux-release"));
        assert_eq!(resolved_tags("refs/heads/feature"), json!("linux-dev"));
    }

    #[test]
    fn test_nested_keys_and_metadata() {
        let fixture = on_branch("refs/heads/main");
        let input = job(
            "deploy",
            json!({
                "script": "ship",
                "variables": {"TARGET": {"by-pipeline-source": {
                    "web": {"by-branch": {"main": "prod", "default": "staging"}},
                    "default": "none",
                }}},
            }),
        )
        .with_metadata(
            serde_json::from_value(json!({
                "always_target": {"by-pipeline-source": {"schedule": true, "default": false}},
            }))
            .unwrap(),
        );

        let out = ResolveKeyedBy.apply(&fixture.ctx(), vec![input]).unwrap();
        assert_eq!(out[0].attribute("variables"), Some(&json!({"TARGET": "prod"})));
        assert_eq!(out[0].metadata["always_target"], json!(false));
    }

    #[test]
    fn test_job_attribute_lookup() {
        let fixture = Fixture::new();
        let input = job(
            "build",
            json!({
                "script": "make",
                "image": "alpine",
                "timeout": {"by-image": {"alpine": "10m", "default": "1h"}},
            }),
        );
        let out = ResolveKeyedBy.apply(&fixture.ctx(), vec![input]).unwrap();
        assert_eq!(out[0].attribute("timeout"), Some(&json!("10m")));
    }

    #[test]
    fn test_ambiguous_or_missing_alternative() {
        let fixture = on_branch("refs/heads/release/1.2");
        let ambiguous = job(
            "build",
            json!({"script": "make", "tags": {"by-branch": {"release/*": "a", "*/1.2": "b"}}}),
        );
        let err = ResolveKeyedBy.apply(&fixture.ctx(), vec![ambiguous]).unwrap_err();
        assert_eq!(err.job.as_deref(), Some("build"));
        assert!(err.message.contains("several alternatives"), "{}", err.message);

        let missing = job(
            "build",
            json!({"script": "make", "tags": {"by-branch": {"main": "a"}}}),
        );
        let err = ResolveKeyedBy.apply(&fixture.ctx(), vec![missing]).unwrap_err();
        assert!(err.message.starts_with("tags: no alternative"), "{}", err.message);

        let pointless = job(
            "build",
            json!({"script": "make", "tags": {"by-branch": {"default": "a"}}}),
        );
        assert!(ResolveKeyedBy.apply(&fixture.ctx(), vec![pointless]).is_err());
    }

    #[test]
    fn test_plain_maps_untouched() {
        let fixture = Fixture::new();
        let input = job(
            "build",
            json!({"script": "make", "variables": {"by-hand": "yes", "OTHER": "x"}}),
        );
        let out = ResolveKeyedBy.apply(&fixture.ctx(), vec![input.clone()]).unwrap();
        assert_eq!(out, vec![input]);
    }
}
