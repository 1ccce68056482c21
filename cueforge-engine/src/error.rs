//! Error types for cueforge-engine
//!
//! Module-specific errors using thiserror. Shared model errors from
//! `cueforge-common` convert in through [`Error::Common`].

use thiserror::Error;
use uuid::Uuid;

/// Main error type for the show-control engine
#[derive(Error, Debug)]
pub enum Error {
    /// Play requested for a cue whose material is not loaded
    #[error("Cue {0} is not loaded")]
    NotLoaded(Uuid),

    /// Play requested for a cue that is already playing
    #[error("Cue {0} is already playing")]
    AlreadyPlaying(Uuid),

    /// Go requested for a cue that is already executing
    #[error("Cue {0} is already executing")]
    AlreadyExecuting(Uuid),

    /// Matrix coordinate or channel index outside the router dimensions
    #[error("Index out of range: {what} {index} (limit {limit})")]
    OutOfRange {
        what: &'static str,
        index: usize,
        limit: usize,
    },

    /// Sample source could not open or decode the file
    #[error("Failed to load {path}: {reason}")]
    LoadFailed { path: String, reason: String },

    /// Cue id not present in the show
    #[error("Cue not found: {0}")]
    TargetNotFound(Uuid),

    /// Output patch id not registered
    #[error("Patch not found: {0}")]
    PatchNotFound(Uuid),

    /// Audio device id not offered by the output sink
    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    /// Operation not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Malformed or unknown control command
    #[error("Invalid command: {0}")]
    InvalidCommand(String),

    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors bubbled up from the shared model
    #[error(transparent)]
    Common(#[from] cueforge_common::Error),
}

impl Error {
    /// Shorthand for a range failure
    pub fn out_of_range(what: &'static str, index: usize, limit: usize) -> Self {
        Error::OutOfRange { what, index, limit }
    }

    pub fn load_failed(path: impl AsRef<std::path::Path>, reason: impl ToString) -> Self {
        Error::LoadFailed {
            path: path.as_ref().display().to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Convenience Result type using the engine Error
pub type Result<T> = std::result::Result<T, Error>;
