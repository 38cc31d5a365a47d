//! Stage declarations (`<stage>/stage.kdl`) and job manifests.

use jobgraph_core::{Attributes, RawJob, StageConfig};
use kdl::{KdlDocument, KdlNode};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::nodes::{children_to_attributes, get_all_string_args, get_first_string_arg, require_name};
use crate::{ConfigError, ConfigResult};

/// Jobs read from a manifest file listed under `jobs-from`.
#[derive(Debug, Clone, Default)]
pub struct JobManifest {
    /// Defaults applied on top of the stage defaults for this file's jobs.
    pub job_defaults: Attributes,
    pub jobs: Vec<RawJob>,
}

/// Parse one stage declaration from KDL text.
///
/// `path` is the stage directory; manifest paths are resolved against it.
pub fn parse_stage(kdl: &str, path: &Path) -> ConfigResult<StageConfig> {
    let doc: KdlDocument = kdl.parse()?;

    let mut stages = doc.nodes().iter().filter(|n| n.name().value() == "stage");
    let node = stages
        .next()
        .ok_or_else(|| ConfigError::MissingField("stage".to_string()))?;
    if stages.next().is_some() {
        return Err(ConfigError::Duplicate(
            "stage (one stage per file)".to_string(),
        ));
    }

    let name = require_name(node, "stage")?;
    if name.contains('/') {
        return Err(ConfigError::InvalidValue {
            field: "stage name".to_string(),
            message: format!("'{}' must not contain '/'", name),
        });
    }

    let mut stage = StageConfig {
        name,
        path: path.to_path_buf(),
        loader: "default".to_string(),
        ..Default::default()
    };

    for child in node.children().map(|c| c.nodes()).unwrap_or_default() {
        match child.name().value() {
            "loader" => {
                stage.loader = get_first_string_arg(child)
                    .ok_or_else(|| ConfigError::MissingField("loader name".to_string()))?;
            }
            "transforms" => {
                stage.transforms.extend(get_all_string_args(child));
            }
            "job-defaults" => {
                stage.job_defaults = children_to_attributes(child.children());
            }
            "jobs-from" => {
                stage.jobs_from.extend(get_all_string_args(child));
            }
            "job" => {
                stage.jobs.push(parse_job(child)?);
            }
            _ => {}
        }
    }

    check_unique(&stage.jobs)?;
    Ok(stage)
}

/// Parse a job manifest: optional `job-defaults` plus `job` nodes.
pub fn parse_manifest(kdl: &str) -> ConfigResult<JobManifest> {
    let doc: KdlDocument = kdl.parse()?;
    let mut manifest = JobManifest::default();

    for node in doc.nodes() {
        match node.name().value() {
            "job-defaults" => {
                manifest.job_defaults = children_to_attributes(node.children());
            }
            "job" => {
                manifest.jobs.push(parse_job(node)?);
            }
            _ => {}
        }
    }

    check_unique(&manifest.jobs)?;
    Ok(manifest)
}

/// Read and parse a manifest, resolving `relative` against `stage_dir`.
pub fn load_manifest(stage_dir: &Path, relative: &str) -> ConfigResult<JobManifest> {
    let path: PathBuf = stage_dir.join(relative);
    let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::from(e).in_file(&path))?;
    parse_manifest(&text).map_err(|e| e.in_file(&path))
}

fn parse_job(node: &KdlNode) -> ConfigResult<RawJob> {
    let name = require_name(node, "job")?;
    Ok(RawJob {
        name,
        fields: children_to_attributes(node.children()),
    })
}

fn check_unique(jobs: &[RawJob]) -> ConfigResult<()> {
    let mut seen = BTreeSet::new();
    for job in jobs {
        if !seen.insert(job.name.as_str()) {
            return Err(ConfigError::Duplicate(format!("job '{}'", job.name)));
        }
    }
    Ok(())
}
