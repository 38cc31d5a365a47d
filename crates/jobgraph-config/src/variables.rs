//! Variable interpolation for job attributes.
//!
//! Available variables:
//! - `${git.sha}`, `${git.short_sha}` (7 chars), `${git.base_sha}`
//! - `${git.branch}` (head ref without `refs/heads/`), `${git.ref}`, `${git.tag}`
//! - `${git.repository}` - head repository URL
//! - `${pipeline.id}`, `${pipeline.source}`, `${pipeline.owner}`
//! - `${build.date}` (YYYY-MM-DD) and `${build.timestamp}`
//! - `${vars.NAME}` - variable from the graph configuration
//!
//! Every value comes from the run parameters or the configuration, never the
//! wall clock, so interpolation is reproducible.

use jobgraph_core::RunParameters;
use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::sync::LazyLock;

static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_]*)?)\}")
        .expect("variable pattern is valid")
});

/// Resolved variables for one run, keyed by `namespace.name`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableContext {
    values: BTreeMap<String, String>,
}

impl VariableContext {
    pub fn from_parameters(params: &RunParameters, vars: &BTreeMap<String, String>) -> Self {
        let build_date = chrono::DateTime::from_timestamp(params.build_date, 0)
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default();

        let builtins = [
            ("git.sha", params.head_rev.clone()),
            ("git.short_sha", params.head_rev.chars().take(7).collect()),
            ("git.base_sha", params.base_rev.clone()),
            ("git.branch", params.branch().to_string()),
            ("git.ref", params.head_ref.clone()),
            ("git.tag", params.head_tag.clone()),
            ("git.repository", params.head_repository.clone()),
            ("pipeline.id", params.id()),
            ("pipeline.source", params.pipeline_source.as_str().to_string()),
            ("pipeline.owner", params.owner.clone()),
            ("build.date", build_date),
            ("build.timestamp", params.build_date.to_string()),
        ];

        let mut values: BTreeMap<String, String> = builtins
            .into_iter()
            .map(|(key, value)| (key.to_string(), value))
            .collect();
        values.extend(
            vars.iter()
                .map(|(name, value)| (format!("vars.{name}"), value.clone())),
        );
        Self { values }
    }

    pub fn resolve(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }

    /// Substitute every `${name}` that resolves; the rest stay as written.
    pub fn interpolate(&self, input: &str) -> String {
        VAR_REGEX
            .replace_all(input, |caps: &Captures| match self.resolve(&caps[1]) {
                Some(value) => value.to_string(),
                None => caps[0].to_string(),
            })
            .into_owned()
    }

    /// Names of the variables in `input` that do not resolve.
    pub fn unresolved(&self, input: &str) -> Vec<String> {
        VAR_REGEX
            .captures_iter(input)
            .map(|caps| caps[1].to_string())
            .filter(|name| self.resolve(name).is_none())
            .collect()
    }
}
