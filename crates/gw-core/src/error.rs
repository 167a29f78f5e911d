//! Error types for GridWave

use thiserror::Error;

/// Core error type
///
/// Variants map to the engine's error taxonomy: lookups that miss,
/// invariant violations, deliberately unsupported operations, transient
/// command failures, and fatal setup errors.
#[derive(Error, Debug)]
pub enum GwError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Constraint violated: {0}")]
    Constraint(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    #[error("Command failed: {0}")]
    Transient(String),

    #[error("Setup failed: {0}")]
    Setup(String),

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type GwResult<T> = Result<T, GwError>;
