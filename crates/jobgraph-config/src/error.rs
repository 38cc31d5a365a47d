//! Configuration parsing errors.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("KDL parse error: {0}")]
    Parse(#[from] kdl::KdlError),

    #[error("in {}: {source}", .path.display())]
    File {
        path: PathBuf,
        #[source]
        source: Box<ConfigError>,
    },

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("duplicate definition: {0}")]
    Duplicate(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConfigError {
    /// Attach the file the error came from.
    pub fn in_file(self, path: impl Into<PathBuf>) -> Self {
        ConfigError::File {
            path: path.into(),
            source: Box::new(self),
        }
    }
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
