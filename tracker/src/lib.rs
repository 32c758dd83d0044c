//! SprintScope tracker - sprint progress from planning artifacts.
//!
//! This crate turns the markdown and YAML artifacts of an agile planning
//! workflow (story files with checkbox task lists, a sprint status document,
//! epic plans) into a single progress snapshot per workspace.
//!
//! # Overview
//!
//! ```text
//! detector --> aggregator (story / sprint_status / epics_plan parsers)
//!          --> state (current story, roll-ups, git delta) --> consumer
//! ```
//!
//! All inputs are read-only. Individual files that cannot be read or parsed
//! contribute nothing instead of failing the whole snapshot, and a failed
//! refresh keeps the previous snapshot.
//!
//! # Modules
//!
//! - [`types`]: Data model shared by every stage
//! - [`detector`]: Workspace layout detection
//! - [`parsers`]: Story, sprint status and epic plan parsers
//! - [`aggregator`]: Directory walk producing ordered epics
//! - [`git_delta`]: Tasks completed since the last commit
//! - [`state`]: Per-root snapshot lifecycle and change notification
//! - [`watcher`]: File-system change source for watch mode
//! - [`config`]: Configuration from environment variables
//! - [`error`]: Error types
//! - [`utils`]: Shared utilities (debouncing)

pub mod aggregator;
pub mod config;
pub mod detector;
pub mod error;
pub mod git_delta;
pub mod parsers;
pub mod state;
pub mod types;
pub mod utils;
pub mod watcher;

pub use aggregator::aggregate;
pub use config::{Config, ConfigError, ConfigOverrides, TrackerSettings};
pub use detector::{detect, detect_with};
pub use error::{Result, TrackerError};
pub use git_delta::tasks_since_last_commit;
pub use state::{select_current_story, ProjectStateManager};
pub use types::{
    DetectionResult, EpicData, EpicsPlan, FileStatus, ProjectProgress, SprintStatus, StoryData,
    StructureVersion, TaskItem, WorkflowStatus,
};
pub use utils::{DebouncerError, RefreshDebouncer};
pub use watcher::ProjectWatcher;
