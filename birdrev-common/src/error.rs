//! Common error types for birdrev

use thiserror::Error;

/// Common result type for birdrev operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types shared by the repository, configuration and tooling layers
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Table layout cannot be used (missing required columns, malformed row)
    #[error("Schema error: {0}")]
    Schema(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the database itself cannot be reached or used
    pub fn is_storage_failure(&self) -> bool {
        matches!(self, Error::Database(_) | Error::Io(_))
    }
}
