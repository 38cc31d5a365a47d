//! Transforms: ordered rewrite steps applied to a stage's declarations.

pub mod defaults;
pub mod interpolate;
pub mod keyed_by;
pub mod matrix;
pub mod needs_limit;
pub mod runners;
pub mod validate;

use jobgraph_config::{GraphConfig, VariableContext};
use jobgraph_core::{Error, JobDeclaration, Result, RunParameters, StageConfig};
use tracing::debug;

use crate::Registry;

pub use defaults::SetDefaults;
pub use interpolate::Interpolate;
pub use keyed_by::ResolveKeyedBy;
pub use matrix::Matrix;
pub use needs_limit::CheckNeedsLimit;
pub use runners::RunnerTags;
pub use validate::Validate;

/// What a transform may look at besides the declarations themselves.
///
/// The stage being transformed is not part of the context: a transform must
/// behave the same whichever stage lists it.
pub struct TransformContext<'a> {
    pub params: &'a RunParameters,
    pub config: &'a GraphConfig,
    pub variables: &'a VariableContext,
}

/// A transform's reason for rejecting its input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformFailure {
    /// Name of the offending job, when one job is to blame.
    pub job: Option<String>,
    pub message: String,
}

impl TransformFailure {
    pub fn job(job: &JobDeclaration, message: impl Into<String>) -> Self {
        Self {
            job: Some(job.name.clone()),
            message: message.into(),
        }
    }
}

pub type TransformResult = std::result::Result<Vec<JobDeclaration>, TransformFailure>;

/// A pure rewrite of a sequence of declarations.
///
/// Transforms may split, merge, drop or validate records. They never modify
/// their input in place; each call returns a new sequence.
pub trait Transform: Send + Sync {
    fn apply(&self, ctx: &TransformContext<'_>, jobs: Vec<JobDeclaration>) -> TransformResult;
}

/// Run the stage's transforms in order.
pub fn run_transforms(
    registry: &Registry,
    stage: &StageConfig,
    ctx: &TransformContext<'_>,
    mut jobs: Vec<JobDeclaration>,
) -> Result<Vec<JobDeclaration>> {
    for name in &stage.transforms {
        let transform = registry.transform(name)?;
        let before = jobs.len();
        jobs = transform
            .apply(ctx, jobs)
            .map_err(|failure| Error::Transform {
                stage: stage.name.clone(),
                job: failure.job,
                transform: name.clone(),
                message: failure.message,
            })?;
        debug!(stage = %stage.name, transform = %name, before, after = jobs.len(), "Applied transform");
    }
    Ok(jobs)
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub struct Fixture {
        pub params: RunParameters,
        pub config: GraphConfig,
        pub variables: VariableContext,
    }

    impl Fixture {
        pub fn new() -> Self {
            Self::with(RunParameters::default(), GraphConfig::default())
        }

        pub fn with(params: RunParameters, config: GraphConfig) -> Self {
            let variables = VariableContext::from_parameters(&params, &config.variables);
            Self {
                params,
                config,
                variables,
            }
        }

        pub fn ctx(&self) -> TransformContext<'_> {
            TransformContext {
                params: &self.params,
                config: &self.config,
                variables: &self.variables,
            }
        }
    }

    pub fn job(name: &str, attributes: serde_json::Value) -> JobDeclaration {
        JobDeclaration::new("test", name).with_attributes(serde_json::from_value(attributes).unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use serde_json::json;

    #[test]
    fn test_transforms_run_in_order() {
        let fixture = Fixture::new();
        let stage = StageConfig {
            name: "test".to_string(),
            transforms: vec!["matrix".to_string(), "validate".to_string()],
            ..Default::default()
        };
        let jobs = vec![job(
            "unit",
            json!({"script": "cargo test", "matrix": {"TOOLCHAIN": ["stable", "nightly"]}}),
        )];

        let out = run_transforms(&Registry::builtin(), &stage, &fixture.ctx(), jobs).unwrap();
        let names: Vec<_> = out.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec!["unit-stable", "unit-nightly"]);
    }

    #[test]
    fn test_failure_names_stage_job_and_transform() {
        let fixture = Fixture::new();
        let stage = StageConfig {
            name: "deploy".to_string(),
            transforms: vec!["validate".to_string()],
            ..Default::default()
        };
        let jobs = vec![job("ship", json!({"script": "x", "trigger": "y"}))];

        let err = run_transforms(&Registry::builtin(), &stage, &fixture.ctx(), jobs).unwrap_err();
        match err {
            Error::Transform {
                stage,
                job,
                transform,
                ..
            } => {
                assert_eq!(stage, "deploy");
                assert_eq!(job.as_deref(), Some("ship"));
                assert_eq!(transform, "validate");
            }
            other => panic!("expected transform error, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_transform() {
        let fixture = Fixture::new();
        let stage = StageConfig {
            name: "x".to_string(),
            transforms: vec!["frobnicate".to_string()],
            ..Default::default()
        };
        let err = run_transforms(&Registry::builtin(), &stage, &fixture.ctx(), vec![]).unwrap_err();
        assert!(matches!(err, Error::UnknownComponent { kind: "transform", .. }));
    }
}
