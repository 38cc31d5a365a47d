//! Stage loaders: turn a stage configuration into job declarations.

use glob::Pattern;
use jobgraph_config::{GraphConfig, load_manifest};
use jobgraph_core::{
    Attributes, Error, JobDeclaration, Need, OptimizationPolicy, RawJob, Result, StageConfig,
    merge_attributes,
};
use serde_json::Value;
use std::collections::BTreeSet;
use tracing::debug;

// Keys of a raw job that configure the engine rather than the CI platform.
const NEEDS: &str = "needs";
const OPTIMIZATION: &str = "optimization";
const SKIP_UNLESS_CHANGED: &str = "skip-unless-changed";
const METADATA: &str = "metadata";

/// Produces the declarations of one stage.
///
/// Defaults are merged in field by field: the job's own fields override the
/// stage defaults, which override the graph defaults. Needs stay symbolic.
pub trait Loader: Send + Sync {
    fn load(&self, stage: &StageConfig, graph: &GraphConfig) -> Result<Vec<JobDeclaration>>;
}

/// Loads the jobs declared inline in `stage.kdl`.
pub struct InlineLoader;

impl Loader for InlineLoader {
    fn load(&self, stage: &StageConfig, graph: &GraphConfig) -> Result<Vec<JobDeclaration>> {
        let defaults = merge_attributes(&graph.job_defaults, &stage.job_defaults);
        let jobs = stage
            .jobs
            .iter()
            .map(|raw| declare(&stage.name, &defaults, raw))
            .collect::<Result<Vec<_>>>()?;
        check_unique(&stage.name, &jobs)?;
        Ok(jobs)
    }
}

/// Loads the jobs of every manifest listed in `jobs-from`, plus any inline
/// jobs. A manifest's own `job-defaults` apply on top of the stage defaults.
pub struct ManifestLoader;

impl Loader for ManifestLoader {
    fn load(&self, stage: &StageConfig, graph: &GraphConfig) -> Result<Vec<JobDeclaration>> {
        let defaults = merge_attributes(&graph.job_defaults, &stage.job_defaults);
        let mut jobs = Vec::new();

        for file in &stage.jobs_from {
            let manifest = load_manifest(&stage.path, file).map_err(|e| Error::Declaration {
                stage: stage.name.clone(),
                job: None,
                message: e.to_string(),
            })?;
            debug!(stage = %stage.name, file = %file, jobs = manifest.jobs.len(), "Loaded manifest");
            let file_defaults = merge_attributes(&defaults, &manifest.job_defaults);
            for raw in &manifest.jobs {
                jobs.push(declare(&stage.name, &file_defaults, raw)?);
            }
        }
        for raw in &stage.jobs {
            jobs.push(declare(&stage.name, &defaults, raw)?);
        }

        check_unique(&stage.name, &jobs)?;
        Ok(jobs)
    }
}

/// Build one declaration from a raw job and the defaults that apply to it.
pub fn declare(stage: &str, defaults: &Attributes, raw: &RawJob) -> Result<JobDeclaration> {
    let fail = |message: String| Error::Declaration {
        stage: stage.to_string(),
        job: Some(raw.name.clone()),
        message,
    };

    if raw.name.is_empty() || raw.name.contains('/') {
        return Err(fail(format!("invalid job name '{}'", raw.name)));
    }

    let mut attributes = merge_attributes(defaults, &raw.fields);

    let needs = match attributes.remove(NEEDS) {
        Some(value) => string_list(&value)
            .ok_or_else(|| fail("needs must be a list of job references".into()))?,
        None => Vec::new(),
    };

    let metadata = match attributes.remove(METADATA) {
        Some(Value::Object(map)) => map.into_iter().collect(),
        Some(_) => return Err(fail("metadata must be a block of key/value pairs".into())),
        None => Attributes::new(),
    };

    let strategy = attributes.remove(OPTIMIZATION);
    let paths = attributes.remove(SKIP_UNLESS_CHANGED);
    let optimization = match (strategy, paths) {
        (None, None) => OptimizationPolicy::Never,
        (None, Some(paths)) => {
            let paths = string_list(&paths)
                .filter(|p| !p.is_empty())
                .ok_or_else(|| {
                    fail("skip-unless-changed needs at least one path pattern".into())
                })?;
            if let Some(bad) = paths.iter().find(|p| Pattern::new(p).is_err()) {
                return Err(fail(format!("invalid path pattern '{}'", bad)));
            }
            OptimizationPolicy::SkipUnlessChanged { paths }
        }
        (Some(Value::String(s)), None) if s == "never" => OptimizationPolicy::Never,
        (Some(Value::String(s)), None) if s == "always" => OptimizationPolicy::Always,
        (Some(_), Some(_)) => {
            return Err(fail(
                "optimization and skip-unless-changed are mutually exclusive".into(),
            ));
        }
        (Some(other), None) => {
            return Err(fail(format!(
                "unknown optimization strategy {}, expected \"never\" or \"always\"",
                other
            )));
        }
    };

    if !attributes.contains_key("script") && !attributes.contains_key("trigger") {
        return Err(fail("job has neither script nor trigger".into()));
    }

    Ok(JobDeclaration::new(stage, raw.name.as_str())
        .with_attributes(attributes)
        .with_metadata(metadata)
        .with_needs(needs.iter().map(|n| Need::parse(n)).collect())
        .with_optimization(optimization))
}

/// A string or a list of strings; `None` for anything else.
fn string_list(value: &Value) -> Option<Vec<String>> {
    match value {
        Value::String(s) => Some(vec![s.clone()]),
        Value::Array(items) => items
            .iter()
            .map(|v| v.as_str().map(String::from))
            .collect(),
        _ => None,
    }
}

fn check_unique(stage: &str, jobs: &[JobDeclaration]) -> Result<()> {
    let mut seen = BTreeSet::new();
    for job in jobs {
        if !seen.insert(job.name.as_str()) {
            return Err(Error::Declaration {
                stage: stage.to_string(),
                job: Some(job.name.clone()),
                message: "job is declared more than once".to_string(),
            });
        }
    }
    Ok(())
}
