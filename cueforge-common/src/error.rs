//! Common error types for CueForge

use thiserror::Error;

/// Common result type for CueForge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the CueForge crates
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Show document or command (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or document content
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
