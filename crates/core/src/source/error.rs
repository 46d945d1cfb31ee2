use thiserror::Error;

/// Errors returned by the data-fetch collaborator.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("{resource} not found: {id}")]
    NotFound { resource: String, id: String },
    #[error("Record source unavailable: {0}")]
    Unavailable(String),
    #[error("Invalid resource key: {0}")]
    InvalidKey(String),
}

/// Result type for record source operations.
pub type Result<T> = std::result::Result<T, SourceError>;
