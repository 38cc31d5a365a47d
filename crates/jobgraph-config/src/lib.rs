//! KDL configuration parsing for jobgraph.
//!
//! This crate handles parsing of:
//! - The graph configuration (config.kdl)
//! - Stage declarations (stage.kdl) and job manifests
//! - Variable interpolation

pub mod error;
pub mod graph;
mod nodes;
pub mod root;
pub mod stage;
pub mod variables;

pub use error::{ConfigError, ConfigResult};
pub use graph::{EmitLimits, GraphConfig, OptimizerSettings, RunnerAlias, parse_graph_config};
pub use root::{ConfigRoot, load_root};
pub use stage::{JobManifest, load_manifest, parse_manifest, parse_stage};
pub use variables::VariableContext;
