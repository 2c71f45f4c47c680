use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error("unknown stage: {0}")]
    UnknownStage(String),
    #[error("unknown geometry type: {0}")]
    UnknownGeometryType(String),
    #[error("unknown field type: {0}")]
    UnknownFieldType(String),
    #[error("unknown severity: {0}")]
    UnknownSeverity(String),
}

pub type Result<T> = std::result::Result<T, ModelError>;
