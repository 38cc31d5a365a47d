//! Raw job declarations as produced by stage loaders.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::JobId;

/// Free-form job fields, kept sorted so serialization is stable.
pub type Attributes = BTreeMap<String, Value>;

/// How the optimizer may treat a job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "kebab-case")]
pub enum OptimizationPolicy {
    /// Always run the job.
    #[default]
    Never,
    /// The job's inputs are never considered changed; it is skipped whenever a
    /// prior run already provides its result.
    Always,
    /// Skip the job unless a changed file matches one of `paths`.
    SkipUnlessChanged { paths: Vec<String> },
}

impl OptimizationPolicy {
    pub fn is_never(&self) -> bool {
        matches!(self, OptimizationPolicy::Never)
    }

    /// Input path patterns declared by the job, if any.
    pub fn input_patterns(&self) -> &[String] {
        match self {
            OptimizationPolicy::SkipUnlessChanged { paths } => paths,
            _ => &[],
        }
    }
}

/// A symbolic dependency reference, resolved by the graph assembler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Need {
    /// A bare job name, looked up in the referring stage first.
    Local(String),
    /// A fully qualified `stage/name` reference.
    Qualified(JobId),
    /// A glob over job ids. Patterns without a `/` are scoped to the
    /// referring stage.
    Pattern(String),
}

impl Need {
    pub fn parse(reference: &str) -> Self {
        if reference.contains(['*', '?', '[']) {
            Need::Pattern(reference.to_string())
        } else {
            match reference.parse::<JobId>() {
                Ok(id) => Need::Qualified(id),
                Err(_) => Need::Local(reference.to_string()),
            }
        }
    }
}

impl fmt::Display for Need {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Need::Local(name) => write!(f, "{}", name),
            Need::Qualified(id) => write!(f, "{}", id),
            Need::Pattern(pattern) => write!(f, "{}", pattern),
        }
    }
}

impl From<String> for Need {
    fn from(s: String) -> Self {
        Need::parse(&s)
    }
}

impl From<Need> for String {
    fn from(need: Need) -> Self {
        need.to_string()
    }
}

/// A stage-scoped job record, before dependency resolution.
///
/// Records are never edited in place once loaded: every transform step
/// consumes its input and builds new records through the `with_*` methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDeclaration {
    pub name: String,
    pub stage: String,
    /// Platform job definition (image, script, variables, ...).
    pub attributes: Attributes,
    /// Selection attributes used by target methods; never emitted.
    pub metadata: Attributes,
    pub needs: Vec<Need>,
    pub optimization: OptimizationPolicy,
}

impl JobDeclaration {
    pub fn new(stage: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stage: stage.into(),
            attributes: Attributes::new(),
            metadata: Attributes::new(),
            needs: Vec::new(),
            optimization: OptimizationPolicy::default(),
        }
    }

    /// The id this declaration will receive in the assembled graph.
    pub fn id(&self) -> JobId {
        JobId::new(&self.stage, &self.name)
    }

    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    pub fn metadata_flag(&self, key: &str) -> bool {
        self.metadata
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_attributes(mut self, attributes: Attributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_metadata(mut self, metadata: Attributes) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_needs(mut self, needs: Vec<Need>) -> Self {
        self.needs = needs;
        self
    }

    pub fn with_optimization(mut self, optimization: OptimizationPolicy) -> Self {
        self.optimization = optimization;
        self
    }
}

/// Merge `overrides` on top of `base`, field by field.
///
/// Nested maps are merged recursively; any other value in `overrides`
/// replaces the one in `base`. Neither input is modified.
pub fn merge_attributes(base: &Attributes, overrides: &Attributes) -> Attributes {
    let mut merged = base.clone();
    for (key, value) in overrides {
        let next = match merged.get(key) {
            Some(existing) => merge_value(existing, value),
            None => value.clone(),
        };
        merged.insert(key.clone(), next);
    }
    merged
}

fn merge_value(base: &Value, over: &Value) -> Value {
    match (base, over) {
        (Value::Object(b), Value::Object(o)) => {
            let mut merged = b.clone();
            for (key, value) in o {
                let next = match merged.get(key) {
                    Some(existing) => merge_value(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), next);
            }
            Value::Object(merged)
        }
        _ => over.clone(),
    }
}
