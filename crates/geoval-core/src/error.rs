use std::path::PathBuf;

use thiserror::Error;

use geoval_ingest::ProviderError;
use geoval_model::ValidationResult;
use geoval_rules::ConfigError;

/// Errors that end a pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid rule configuration: {0}")]
    Configuration(#[from] ConfigError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Cooperative cancellation; carries the result accumulated so far.
    #[error("validation of {} was cancelled", .0.target_file.display())]
    Cancelled(Box<ValidationResult>),

    #[error("pipeline worker panicked")]
    WorkerPanicked,
}

impl PipelineError {
    /// Partial result of a cancelled run.
    pub fn partial_result(&self) -> Option<&ValidationResult> {
        match self {
            Self::Cancelled(result) => Some(result),
            _ => None,
        }
    }
}

/// Errors loading pipeline settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid setting {key}: {message}")]
    Invalid { key: String, message: String },
}

/// Errors reading or writing the run history.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("failed to access run history {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode run history record: {0}")]
    Encode(#[from] serde_json::Error),
}
