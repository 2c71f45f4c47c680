use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse CSV {path}: {message}")]
    Csv { path: PathBuf, message: String },

    #[error("missing required column {column} in {path}")]
    MissingColumn { path: PathBuf, column: String },

    #[error("invalid value in {path} line {line}, column {column}: {message}")]
    InvalidValue {
        path: PathBuf,
        line: u64,
        column: String,
        message: String,
    },

    #[error("missing criterion {name} required by {required_by}")]
    MissingCriterion { name: String, required_by: String },

    #[error("criterion {name} has non-numeric value {value:?}")]
    NonNumericCriterion { name: String, value: String },

    #[error("duplicate criterion {name}")]
    DuplicateCriterion { name: String },

    #[error("invalid pattern {pattern:?}: {message}")]
    InvalidPattern { pattern: String, message: String },
}

impl ConfigError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
