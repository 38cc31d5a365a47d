//! Named loaders, transforms and target methods.

use jobgraph_core::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::loader::{InlineLoader, Loader, ManifestLoader};
use crate::target::{
    AllTargets, ChangedTargets, DefaultTargets, NamedTargets, NoTargets, TargetStrategy,
};
use crate::transforms::{
    CheckNeedsLimit, Interpolate, Matrix, ResolveKeyedBy, RunnerTags, SetDefaults, Transform,
    Validate,
};

/// Lookup table from configuration names to implementations.
///
/// Populated once at startup and shared read-only afterwards.
#[derive(Clone, Default)]
pub struct Registry {
    loaders: BTreeMap<String, Arc<dyn Loader>>,
    transforms: BTreeMap<String, Arc<dyn Transform>>,
    targets: BTreeMap<String, Arc<dyn TargetStrategy>>,
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in component.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry
            .register_loader("default", InlineLoader)
            .register_loader("manifest", ManifestLoader)
            .register_transform("set-defaults", SetDefaults)
            .register_transform("matrix", Matrix)
            .register_transform("interpolate", Interpolate)
            .register_transform("resolve-keyed-by", ResolveKeyedBy)
            .register_transform("runner-tags", RunnerTags)
            .register_transform("validate", Validate)
            .register_transform("check-needs-limit", CheckNeedsLimit)
            .register_target("all", AllTargets)
            .register_target("names", NamedTargets)
            .register_target("changed", ChangedTargets)
            .register_target("default", DefaultTargets)
            .register_target("nothing", NoTargets);
        registry
    }

    pub fn register_loader(&mut self, name: &str, loader: impl Loader + 'static) -> &mut Self {
        self.loaders.insert(name.to_string(), Arc::new(loader));
        self
    }

    pub fn register_transform(
        &mut self,
        name: &str,
        transform: impl Transform + 'static,
    ) -> &mut Self {
        self.transforms.insert(name.to_string(), Arc::new(transform));
        self
    }

    pub fn register_target(
        &mut self,
        name: &str,
        strategy: impl TargetStrategy + 'static,
    ) -> &mut Self {
        self.targets.insert(name.to_string(), Arc::new(strategy));
        self
    }

    pub fn loader(&self, name: &str) -> Result<Arc<dyn Loader>> {
        self.loaders
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownComponent {
                kind: "loader",
                name: name.to_string(),
            })
    }

    pub fn transform(&self, name: &str) -> Result<Arc<dyn Transform>> {
        self.transforms
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownComponent {
                kind: "transform",
                name: name.to_string(),
            })
    }

    pub fn target(&self, name: &str) -> Result<Arc<dyn TargetStrategy>> {
        self.targets
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownTargetMethod(name.to_string()))
    }

    pub fn target_names(&self) -> impl Iterator<Item = &str> {
        self.targets.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_components() {
        let registry = Registry::builtin();
        assert!(registry.loader("default").is_ok());
        assert!(registry.loader("manifest").is_ok());
        assert!(registry.transform("check-needs-limit").is_ok());
        assert!(registry.transform("resolve-keyed-by").is_ok());
        assert_eq!(
            registry.target_names().collect::<Vec<_>>(),
            vec!["all", "changed", "default", "names", "nothing"]
        );
    }

    #[test]
    fn test_unknown_names() {
        let registry = Registry::builtin();
        assert!(matches!(
            registry.loader("yaml"),
            Err(Error::UnknownComponent { kind: "loader", .. })
        ));
        let err = registry.target("everything").err().unwrap();
        assert_eq!(err.to_string(), "unknown target method: everything");
    }
}
