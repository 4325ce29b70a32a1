//! Error types for workflow loading and simulation

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading a workflow or starting a run
#[derive(Debug, Error)]
pub enum SimError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Document parsed but has no `system` root key
    #[error("invalid workflow document: missing \"system\" root key")]
    MissingSystemRoot,

    /// The `flow` section is not a list of links
    #[error("invalid flow format: expected a list of links")]
    InvalidFlow,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SimError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
