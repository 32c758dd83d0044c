//! Parsers for the three kinds of project documents.
//!
//! - [`story`]: one markdown story file into a task tree plus metadata
//! - [`sprint_status`]: `sprint-status.yaml` into authoritative statuses
//! - [`epics_plan`]: epic planning documents into planned epics and stories
//!
//! Each parser is a pure function of text with a thin async loader on top.
//! Loaders for story files and plans report failures as `None`; only the
//! status document propagates errors, since a broken authoritative source
//! should not silently be replaced by inferred status.

pub mod epics_plan;
pub mod sprint_status;
pub mod story;

pub use epics_plan::{parse_epics_content, parse_epics_plan};
pub use sprint_status::{load_sprint_status, parse_sprint_status, SPRINT_STATUS_FILE};
pub use story::{parse_story_content, parse_story_file, parse_tasks};
