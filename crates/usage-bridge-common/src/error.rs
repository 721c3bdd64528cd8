//! Error types shared across the workspace

use thiserror::Error;

/// Result type alias for common operations
pub type Result<T> = std::result::Result<T, CommonError>;

/// Errors raised by the shared helpers
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid value {value:?} for {name}: {reason}")]
    InvalidVariable {
        name: String,
        value: String,
        reason: String,
    },
}

impl CommonError {
    /// Shorthand for a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        CommonError::Config(message.into())
    }
}
