//! Stage execution errors.

use thiserror::Error;

use geoval_ingest::ProviderError;
use geoval_rules::ConfigError;

/// Failure inside a single stage.
///
/// Everything except [`StageError::Cancelled`] is recovered by the pipeline:
/// the stage is marked failed and the run moves on.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("data access failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid pattern {pattern:?}: {message}")]
    Pattern { pattern: String, message: String },

    /// Cancellation was observed between units of work.
    #[error("stage cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, StageError>;
