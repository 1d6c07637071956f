//! Common error types for Civitas

use thiserror::Error;

use crate::validation::ValidationErrors;

/// Common result type for Civitas operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the Civitas crates
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

    /// One or more request fields failed validation
    #[error("Validation failed: {0}")]
    Validation(ValidationErrors),

    /// Request conflicts with current state (duplicate, illegal transition)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Missing or invalid credentials
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Authenticated but not allowed
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Object storage failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Upstream messaging gateway failure
    #[error("Gateway error: {0}")]
    Gateway(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ValidationErrors> for Error {
    fn from(errors: ValidationErrors) -> Self {
        Error::Validation(errors)
    }
}

impl Error {
    /// True when the wrapped database error is a UNIQUE constraint violation
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Error::Database(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }
}
