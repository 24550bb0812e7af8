//! Common error types for GPC

use thiserror::Error;

/// Common result type for GPC operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across GPC services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[cfg(feature = "sqlx")]
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

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for SQLite lock contention errors that are worth retrying
    pub fn is_database_locked(&self) -> bool {
        match self {
            #[cfg(feature = "sqlx")]
            Error::Database(db_err) => db_err.to_string().contains("database is locked"),
            _ => false,
        }
    }
}
