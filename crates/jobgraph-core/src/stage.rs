//! Stage configuration.

use std::path::PathBuf;

use crate::Attributes;

/// A named group of job declarations sharing a loader and transforms.
#[derive(Debug, Clone, Default)]
pub struct StageConfig {
    /// Stage name; also the first segment of every job id it produces.
    pub name: String,
    /// Directory the stage was loaded from; `jobs-from` paths are relative to it.
    pub path: PathBuf,
    /// Registry name of the loader.
    pub loader: String,
    /// Registry names of the transforms, applied in order.
    pub transforms: Vec<String>,
    /// Defaults merged under every job of this stage.
    pub job_defaults: Attributes,
    /// Jobs declared inline.
    pub jobs: Vec<RawJob>,
    /// Job manifest files, read by the `manifest` loader.
    pub jobs_from: Vec<String>,
}

/// A job as written in configuration, with reserved keys still inline.
#[derive(Debug, Clone, PartialEq)]
pub struct RawJob {
    pub name: String,
    pub fields: Attributes,
}
