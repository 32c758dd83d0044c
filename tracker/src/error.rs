//! Error types for the SprintScope tracker.
//!
//! Most of the pipeline never surfaces errors: unreadable story files, missing
//! plan files and an absent version-control checkout all degrade to defined
//! fallback values. The variants here cover the few failures that do travel
//! upward, mostly to the refresh boundary in [`crate::state`], where they are
//! logged and the previous snapshot is kept.

use thiserror::Error;

use crate::config::ConfigError;

/// Errors that can occur during tracker operations.
#[derive(Error, Debug)]
pub enum TrackerError {
    /// Configuration-related error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The sprint status document is present but is not valid YAML.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// File watching error.
    #[error("file watch error: {0}")]
    Watch(String),

    /// An operation that needs a detected project was called before
    /// [`ProjectStateManager::initialize`](crate::state::ProjectStateManager::initialize)
    /// succeeded.
    #[error("no project structure is being tracked")]
    NotTracking,
}

/// A specialized `Result` type for tracker operations.
pub type Result<T> = std::result::Result<T, TrackerError>;
