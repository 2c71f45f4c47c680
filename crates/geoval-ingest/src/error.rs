//! Error types for dataset access.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by a [`crate::DataProvider`].
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Dataset file not found.
    #[error("dataset not found: {path}")]
    FileNotFound { path: PathBuf },

    /// Failed to read the dataset file.
    #[error("failed to read dataset {path}: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The dataset file is not valid JSON or has the wrong shape.
    #[error("failed to parse dataset {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Two layers share an id.
    #[error("duplicate layer id {layer} in {path}")]
    DuplicateLayer { layer: String, path: PathBuf },

    /// Requested layer does not exist.
    #[error("unknown layer {layer}")]
    UnknownLayer { layer: String },
}

/// Result type for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;
