//! Loading a whole configuration tree from disk.

use jobgraph_core::StageConfig;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::graph::{GraphConfig, parse_graph_config};
use crate::stage::parse_stage;
use crate::{ConfigError, ConfigResult};

pub const GRAPH_CONFIG_FILE: &str = "config.kdl";
pub const STAGE_FILE: &str = "stage.kdl";

/// The graph configuration and every stage under a root directory.
#[derive(Debug, Clone)]
pub struct ConfigRoot {
    pub dir: PathBuf,
    pub graph: GraphConfig,
    /// Stages sorted by name.
    pub stages: Vec<StageConfig>,
}

/// Load `<dir>/config.kdl` and every `<dir>/<stage>/stage.kdl`.
///
/// A missing `config.kdl` yields the default graph configuration.
pub fn load_root(dir: &Path) -> ConfigResult<ConfigRoot> {
    let config_path = dir.join(GRAPH_CONFIG_FILE);
    let graph = if config_path.is_file() {
        let text = std::fs::read_to_string(&config_path)
            .map_err(|e| ConfigError::from(e).in_file(&config_path))?;
        parse_graph_config(&text).map_err(|e| e.in_file(&config_path))?
    } else {
        debug!(path = %config_path.display(), "No graph config, using defaults");
        GraphConfig::default()
    };

    let mut stage_files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| ConfigError::from(e).in_file(dir))? {
        let entry = entry?;
        let stage_file = entry.path().join(STAGE_FILE);
        if entry.file_type()?.is_dir() && stage_file.is_file() {
            stage_files.push((entry.path(), stage_file));
        }
    }

    let mut stages = BTreeMap::new();
    for (stage_dir, stage_file) in stage_files {
        let text = std::fs::read_to_string(&stage_file)
            .map_err(|e| ConfigError::from(e).in_file(&stage_file))?;
        let stage = parse_stage(&text, &stage_dir).map_err(|e| e.in_file(&stage_file))?;
        debug!(stage = %stage.name, jobs = stage.jobs.len(), "Parsed stage");
        if stages.contains_key(&stage.name) {
            return Err(ConfigError::Duplicate(format!("stage '{}'", stage.name))
                .in_file(&stage_file));
        }
        stages.insert(stage.name.clone(), stage);
    }

    Ok(ConfigRoot {
        dir: dir.to_path_buf(),
        graph,
        stages: stages.into_values().collect(),
    })
}
