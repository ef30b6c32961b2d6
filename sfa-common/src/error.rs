//! Common error types for SFA

use thiserror::Error;

/// Common result type for SFA operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across SFA crates
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

    /// Stage dependency unsatisfied: the track has no completed,
    /// readable download to feed processing or analysis
    #[error("Track {0} has no completed download")]
    NoCompletedDownload(uuid::Uuid),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
