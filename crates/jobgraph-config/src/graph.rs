//! Graph-level configuration (`config.kdl`).

use jobgraph_core::Attributes;
use kdl::{KdlDocument, KdlNode};
use std::collections::BTreeMap;
use url::Url;

use crate::nodes::{
    children_to_attributes, get_all_string_args, get_first_string_arg, get_string_prop,
    get_usize_arg, require_name,
};
use crate::{ConfigError, ConfigResult};

pub const DEFAULT_MAX_UPSTREAM_DEPENDENCIES: usize = 50;

/// Settings shared by every stage.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// Defaults merged under every job of every stage.
    pub job_defaults: Attributes,
    pub max_upstream_dependencies: usize,
    /// User variables, available as `${vars.NAME}`.
    pub variables: BTreeMap<String, String>,
    pub runners: BTreeMap<String, RunnerAlias>,
    pub emit: EmitLimits,
    pub optimizer: OptimizerSettings,
    /// Prior-result index queried by the optimizer.
    pub history_url: Option<Url>,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            job_defaults: Attributes::new(),
            max_upstream_dependencies: DEFAULT_MAX_UPSTREAM_DEPENDENCIES,
            variables: BTreeMap::new(),
            runners: BTreeMap::new(),
            emit: EmitLimits::default(),
            optimizer: OptimizerSettings::default(),
            history_url: None,
        }
    }
}

/// Runner tags for one alias, by protection level of the head ref.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunnerAlias {
    pub protected: Vec<String>,
    pub unprotected: Vec<String>,
}

impl RunnerAlias {
    pub fn tags(&self, protected: bool) -> &[String] {
        if protected {
            &self.protected
        } else {
            &self.unprotected
        }
    }
}

/// Limits the CI platform puts on a single configuration document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmitLimits {
    pub max_document_bytes: usize,
    pub max_depth: usize,
}

impl Default for EmitLimits {
    fn default() -> Self {
        Self {
            max_document_bytes: 1024 * 1024,
            max_depth: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptimizerSettings {
    /// Predicate calls in flight at once.
    pub concurrency: usize,
    /// Extra attempts after a failed predicate call.
    pub retries: u32,
    /// Delay before the first retry; doubled on every further attempt.
    pub backoff_ms: u64,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            concurrency: 8,
            retries: 3,
            backoff_ms: 200,
        }
    }
}

/// Parse the graph configuration from KDL text.
pub fn parse_graph_config(kdl: &str) -> ConfigResult<GraphConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = GraphConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "job-defaults" => {
                config.job_defaults = children_to_attributes(node.children());
            }
            "max-upstream-dependencies" => {
                config.max_upstream_dependencies =
                    get_usize_arg(node, "max-upstream-dependencies")?;
            }
            "variables" => {
                for child in node.children().map(|c| c.nodes()).unwrap_or_default() {
                    let key = child.name().value().to_string();
                    let value = get_first_string_arg(child).ok_or_else(|| {
                        ConfigError::InvalidValue {
                            field: format!("variables.{}", key),
                            message: "expected a string".to_string(),
                        }
                    })?;
                    config.variables.insert(key, value);
                }
            }
            "runners" => {
                for child in node.children().map(|c| c.nodes()).unwrap_or_default() {
                    if child.name().value() != "alias" {
                        continue;
                    }
                    let (name, alias) = parse_runner_alias(child)?;
                    if config.runners.insert(name.clone(), alias).is_some() {
                        return Err(ConfigError::Duplicate(format!("runner alias '{}'", name)));
                    }
                }
            }
            "emit" => {
                for child in node.children().map(|c| c.nodes()).unwrap_or_default() {
                    match child.name().value() {
                        "max-document-bytes" => {
                            config.emit.max_document_bytes =
                                get_usize_arg(child, "emit.max-document-bytes")?;
                        }
                        "max-depth" => {
                            config.emit.max_depth = get_usize_arg(child, "emit.max-depth")?;
                        }
                        _ => {}
                    }
                }
            }
            "optimizer" => {
                for child in node.children().map(|c| c.nodes()).unwrap_or_default() {
                    match child.name().value() {
                        "concurrency" => {
                            let n = get_usize_arg(child, "optimizer.concurrency")?;
                            if n == 0 {
                                return Err(ConfigError::InvalidValue {
                                    field: "optimizer.concurrency".to_string(),
                                    message: "must be at least 1".to_string(),
                                });
                            }
                            config.optimizer.concurrency = n;
                        }
                        "retries" => {
                            let n = get_usize_arg(child, "optimizer.retries")?;
                            config.optimizer.retries =
                                u32::try_from(n).map_err(|_| ConfigError::InvalidValue {
                                    field: "optimizer.retries".to_string(),
                                    message: "too large".to_string(),
                                })?;
                        }
                        "backoff-ms" => {
                            config.optimizer.backoff_ms =
                                get_usize_arg(child, "optimizer.backoff-ms")? as u64;
                        }
                        _ => {}
                    }
                }
            }
            "history" => {
                let raw = get_string_prop(node, "url")
                    .or_else(|| get_first_string_arg(node))
                    .ok_or_else(|| ConfigError::MissingField("history url".to_string()))?;
                let url = Url::parse(&raw).map_err(|e| ConfigError::InvalidValue {
                    field: "history.url".to_string(),
                    message: e.to_string(),
                })?;
                config.history_url = Some(url);
            }
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(config)
}

fn parse_runner_alias(node: &KdlNode) -> ConfigResult<(String, RunnerAlias)> {
    let name = require_name(node, "runner alias")?;
    let mut alias = RunnerAlias::default();
    for child in node.children().map(|c| c.nodes()).unwrap_or_default() {
        match child.name().value() {
            "protected" => alias.protected = get_all_string_args(child),
            "unprotected" => alias.unprotected = get_all_string_args(child),
            _ => {}
        }
    }
    if alias.protected.is_empty() && alias.unprotected.is_empty() {
        return Err(ConfigError::MissingField(format!(
            "tags for runner alias '{}'",
            name
        )));
    }
    Ok((name, alias))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_full_config() {
        let kdl = r#"
            job-defaults {
                image "alpine:3.20"
                interruptible #true
            }
            max-upstream-dependencies 20
            variables {
                REGISTRY "registry.example.com"
            }
            runners {
                alias "linux" {
                    protected "linux-protected"
                    unprotected "linux-shared"
                }
            }
            emit {
                max-document-bytes 4096
                max-depth 10
            }
            optimizer {
                concurrency 4
                retries 1
                backoff-ms 50
            }
            history url="https://history.example.com/results"
        "#;

        let config = parse_graph_config(kdl).unwrap();
        assert_eq!(config.job_defaults["image"], json!("alpine:3.20"));
        assert_eq!(config.max_upstream_dependencies, 20);
        assert_eq!(config.variables["REGISTRY"], "registry.example.com");
        assert_eq!(config.runners["linux"].tags(true), ["linux-protected"]);
        assert_eq!(config.runners["linux"].tags(false), ["linux-shared"]);
        assert_eq!(
            config.emit,
            EmitLimits {
                max_document_bytes: 4096,
                max_depth: 10
            }
        );
        assert_eq!(config.optimizer.concurrency, 4);
        assert_eq!(config.optimizer.retries, 1);
        assert_eq!(config.optimizer.backoff_ms, 50);
        assert_eq!(
            config.history_url.unwrap().as_str(),
            "https://history.example.com/results"
        );
    }

    #[test]
    fn test_defaults() {
        let config = parse_graph_config("").unwrap();
        assert_eq!(config.max_upstream_dependencies, 50);
        assert_eq!(config.optimizer, OptimizerSettings::default());
        assert!(config.history_url.is_none());
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let result = parse_graph_config("optimizer {\n concurrency 0\n}");
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_duplicate_runner_alias() {
        let kdl = r#"
            runners {
                alias "linux" { protected "a"; }
                alias "linux" { protected "b"; }
            }
        "#;
        assert!(matches!(
            parse_graph_config(kdl),
            Err(ConfigError::Duplicate(_))
        ));
    }
}
