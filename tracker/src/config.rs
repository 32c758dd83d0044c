//! Configuration module for SprintScope.
//!
//! This module handles parsing configuration from environment variables.
//! Command-line flags in the `sprintscope` binary are passed in as
//! [`ConfigOverrides`]; a variable whose value is overridden is never read,
//! so an invalid value there cannot fail the run.
//!
//! # Environment Variables
//!
//! | Variable | Required | Default | Description |
//! |----------|----------|---------|-------------|
//! | `SPRINTSCOPE_ROOT` | No | current directory | Workspace root to track |
//! | `SPRINTSCOPE_STORIES_PATH` | No | - | Explicit stories directory (skips detection) |
//! | `SPRINTSCOPE_GIT` | No | `true` | Compute tasks completed since the last commit |
//! | `SPRINTSCOPE_DEBOUNCE_MS` | No | 500 | Quiet window before a watch-mode refresh |
//!
//! # Example
//!
//! ```no_run
//! use sprintscope_tracker::config::Config;
//!
//! let config = Config::from_env().expect("Failed to load configuration");
//! println!("Tracking: {}", config.root.display());
//! ```

use std::env;
use std::path::PathBuf;

use thiserror::Error;

/// Default quiet window for coalescing file-change bursts.
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Errors that can occur during configuration parsing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Environment variable has an invalid value.
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Failed to determine the working directory used as the default root.
    #[error("failed to determine current directory: {0}")]
    NoCurrentDirectory(#[source] std::io::Error),
}

/// The settings the tracking core consumes.
///
/// This is the small settings object the host hands to
/// [`ProjectStateManager`](crate::state::ProjectStateManager).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackerSettings {
    /// Stories directory that overrides layout detection when it exists.
    pub stories_override: Option<PathBuf>,

    /// Whether to query git for tasks completed since the last commit.
    pub git_enabled: bool,
}

/// Values that replace their environment variable when set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub root: Option<PathBuf>,
    pub stories_override: Option<PathBuf>,
    pub git_enabled: Option<bool>,
    pub debounce_ms: Option<u64>,
}

/// Configuration for SprintScope.
#[derive(Debug, Clone)]
pub struct Config {
    /// Workspace root to track.
    pub root: PathBuf,

    /// Optional explicit stories directory.
    pub stories_override: Option<PathBuf>,

    /// Whether git integration is enabled.
    pub git_enabled: bool,

    /// Watch-mode coalescing window in milliseconds.
    pub debounce_ms: u64,
}

impl Config {
    /// Creates a new `Config` by parsing environment variables.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if:
    /// - `SPRINTSCOPE_GIT` is set but is not a recognized boolean
    /// - `SPRINTSCOPE_DEBOUNCE_MS` is set but is not a positive integer
    /// - `SPRINTSCOPE_ROOT` is unset and the current directory is unavailable
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(&ConfigOverrides::default())
    }

    /// Like [`from_env`](Self::from_env), but takes each value from
    /// `overrides` when it is set there and skips its variable.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env), limited to the variables that
    /// are actually read.
    pub fn from_env_with(overrides: &ConfigOverrides) -> Result<Self, ConfigError> {
        // Optional: SPRINTSCOPE_ROOT (default: current directory)
        let root = match (&overrides.root, env::var("SPRINTSCOPE_ROOT")) {
            (Some(root), _) => root.clone(),
            (None, Ok(val)) if !val.trim().is_empty() => PathBuf::from(val),
            (None, _) => env::current_dir().map_err(ConfigError::NoCurrentDirectory)?,
        };

        // Optional: SPRINTSCOPE_STORIES_PATH (default: None = detect)
        let stories_override = overrides.stories_override.clone().or_else(|| {
            env::var("SPRINTSCOPE_STORIES_PATH")
                .ok()
                .map(|val| val.trim().to_string())
                .filter(|val| !val.is_empty())
                .map(PathBuf::from)
        });

        // Optional: SPRINTSCOPE_GIT (default: true)
        let git_enabled = match overrides.git_enabled {
            Some(enabled) => enabled,
            None => match env::var("SPRINTSCOPE_GIT") {
                Ok(val) => parse_bool(&val).ok_or_else(|| ConfigError::InvalidValue {
                    key: "SPRINTSCOPE_GIT".to_string(),
                    message: format!("expected boolean, got '{val}'"),
                })?,
                Err(_) => true,
            },
        };

        // Optional: SPRINTSCOPE_DEBOUNCE_MS (default: 500, must be > 0)
        let debounce_ms = match overrides.debounce_ms {
            Some(ms) => ms,
            None => match env::var("SPRINTSCOPE_DEBOUNCE_MS") {
                Ok(val) => {
                    let ms = val.parse::<u64>().map_err(|_| ConfigError::InvalidValue {
                        key: "SPRINTSCOPE_DEBOUNCE_MS".to_string(),
                        message: format!("expected positive integer, got '{val}'"),
                    })?;
                    if ms == 0 {
                        return Err(ConfigError::InvalidValue {
                            key: "SPRINTSCOPE_DEBOUNCE_MS".to_string(),
                            message: "debounce window must be greater than 0".to_string(),
                        });
                    }
                    ms
                }
                Err(_) => DEFAULT_DEBOUNCE_MS,
            },
        };

        Ok(Self {
            root,
            stories_override,
            git_enabled,
            debounce_ms,
        })
    }

    /// Returns the subset of configuration the tracking core needs.
    #[must_use]
    pub fn settings(&self) -> TrackerSettings {
        TrackerSettings {
            stories_override: self.stories_override.clone(),
            git_enabled: self.git_enabled,
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
