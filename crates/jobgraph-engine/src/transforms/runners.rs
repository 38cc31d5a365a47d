//! Resolve runner aliases into runner tags.

use jobgraph_core::JobDeclaration;
use serde_json::Value;

use super::{Transform, TransformContext, TransformFailure, TransformResult};

const RUNNER_ALIAS: &str = "runner-alias";

/// Replaces `runner-alias` with the alias's tags for the head ref's
/// protection level. Tags already on the job are kept.
pub struct RunnerTags;

impl Transform for RunnerTags {
    fn apply(&self, ctx: &TransformContext<'_>, jobs: Vec<JobDeclaration>) -> TransformResult {
        let protected = ctx.params.head_ref_protection.is_protected();
        jobs.into_iter()
            .map(|job| -> Result<JobDeclaration, TransformFailure> {
                let Some(alias) = job.attribute(RUNNER_ALIAS) else {
                    return Ok(job);
                };
                let name = alias
                    .as_str()
                    .ok_or_else(|| TransformFailure::job(&job, "runner-alias must be a string"))?;
                let runner = ctx.config.runners.get(name).ok_or_else(|| {
                    TransformFailure::job(&job, format!("unknown runner alias '{}'", name))
                })?;
                let alias_tags = runner.tags(protected);
                if alias_tags.is_empty() {
                    return Err(TransformFailure::job(
                        &job,
                        format!(
                            "runner alias '{}' has no {} tags",
                            name,
                            ctx.params.head_ref_protection.as_str()
                        ),
                    ));
                }

                let mut attributes = job.attributes.clone();
                attributes.remove(RUNNER_ALIAS);
                let mut tags: Vec<Value> = match attributes.remove("tags") {
                    Some(Value::Array(items)) => items,
                    Some(Value::String(s)) => vec![Value::String(s)],
                    _ => Vec::new(),
                };
                for tag in alias_tags {
                    let tag = Value::String(tag.clone());
                    if !tags.contains(&tag) {
                        tags.push(tag);
                    }
                }
                attributes.insert("tags".to_string(), Value::Array(tags));
                Ok(job.with_attributes(attributes))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transforms::test_support::*;
    use jobgraph_config::{GraphConfig, RunnerAlias};
    use jobgraph_core::{RefProtection, RunParameters};
    use serde_json::json;

    fn fixture(protection: RefProtection) -> Fixture {
        let mut config = GraphConfig::default();
        config.runners.insert(
            "linux".to_string(),
            RunnerAlias {
                protected: vec!["linux-protected".to_string()],
                unprotected: vec!["linux-shared".to_string()],
            },
        );
        let params = RunParameters {
            head_ref_protection: protection,
            ..Default::default()
        };
        Fixture::with(params, config)
    }

    #[test]
    fn test_tags_follow_protection_level() {
        let input = job("build", json!({"script": "x", "runner-alias": "linux", "tags": ["docker"]}));

        let protected = fixture(RefProtection::Protected);
        let out = RunnerTags.apply(&protected.ctx(), vec![input.clone()]).unwrap();
        assert_eq!(out[0].attribute("tags"), Some(&json!(["docker", "linux-protected"])));
        assert!(out[0].attribute("runner-alias").is_none());

        let unprotected = fixture(RefProtection::Unprotected);
        let out = RunnerTags.apply(&unprotected.ctx(), vec![input]).unwrap();
        assert_eq!(out[0].attribute("tags"), Some(&json!(["docker", "linux-shared"])));
    }

    #[test]
    fn test_unknown_alias() {
        let fixture = fixture(RefProtection::Protected);
        let input = job("build", json!({"script": "x", "runner-alias": "windows"}));
        let err = RunnerTags.apply(&fixture.ctx(), vec![input]).unwrap_err();
        assert!(err.message.contains("windows"));
    }
}
