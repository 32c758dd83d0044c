//! Data model for sprint progress snapshots.
//!
//! Every value here is built once and never mutated afterwards: a refresh
//! produces a brand-new [`ProjectProgress`] rather than patching the previous
//! one. All types serialize to camelCase JSON for consumers outside the crate.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Layout convention a workspace was classified as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StructureVersion {
    /// Current convention (`_bmad/` marker or `_bmad-output/` output root).
    V6,
    /// Legacy convention (`.bmad-core/` marker or `docs/stories/`).
    V4,
    /// Generic layout: explicit override or a fallback folder.
    QuickFlow,
    /// Nothing recognizable; tracking cannot proceed.
    Unknown,
}

impl std::fmt::Display for StructureVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::V6 => "v6",
            Self::V4 => "v4",
            Self::QuickFlow => "quick-flow",
            Self::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// Where a workspace keeps its stories, status document and plans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResult {
    pub version: StructureVersion,
    /// Empty when `version` is [`StructureVersion::Unknown`].
    pub stories_path: PathBuf,
    pub config_path: Option<PathBuf>,
    pub epics_path: Option<PathBuf>,
}

impl DetectionResult {
    /// The result for a workspace with no recognized layout.
    #[must_use]
    pub fn unknown() -> Self {
        Self {
            version: StructureVersion::Unknown,
            stories_path: PathBuf::new(),
            config_path: None,
            epics_path: None,
        }
    }

    /// Whether this result carries enough information to start tracking.
    #[must_use]
    pub fn is_trackable(&self) -> bool {
        self.version != StructureVersion::Unknown && !self.stories_path.as_os_str().is_empty()
    }
}

/// A checkbox task and the tasks nested beneath it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskItem {
    pub text: String,
    pub completed: bool,
    /// 1-based line number in the source file.
    pub source_line: usize,
    pub children: Vec<TaskItem>,
}

/// Counts completed and total tasks over every node of a task forest.
///
/// Parents and children are counted independently; a parent is not derived
/// from its children.
#[must_use]
pub fn count_tasks(items: &[TaskItem]) -> (u32, u32) {
    items.iter().fold((0, 0), |(done, total), item| {
        let (child_done, child_total) = count_tasks(&item.children);
        (
            done + u32::from(item.completed) + child_done,
            total + 1 + child_total,
        )
    })
}

/// Integer completion percentage, `0` when there is nothing to complete.
///
/// ```
/// use sprintscope_tracker::types::percentage;
///
/// assert_eq!(percentage(0, 0), 0);
/// assert_eq!(percentage(1, 3), 33);
/// assert_eq!(percentage(2, 3), 67);
/// ```
#[must_use]
pub fn percentage(completed: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    let ratio = f64::from(completed.min(total)) / f64::from(total);
    (ratio * 100.0).round() as u8
}

/// Parses the leading numeric part of an identifier, `0` when it has none.
///
/// Used as the sort key for epics; namespaced identifiers such as `gds-2`
/// sort as `0`.
#[must_use]
pub fn numeric_key(identifier: &str) -> u32 {
    identifier.trim().parse().unwrap_or(0)
}

/// Status computed purely from a story's own checkboxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileStatus {
    NotStarted,
    InProgress,
    Completed,
}

impl FileStatus {
    #[must_use]
    pub fn from_counts(completed: u32, total: u32) -> Self {
        if completed == 0 {
            Self::NotStarted
        } else if completed >= total {
            Self::Completed
        } else {
            Self::InProgress
        }
    }
}

/// Authoritative workflow status as written in the sprint status document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkflowStatus {
    #[default]
    Backlog,
    Drafted,
    Contexted,
    ReadyForDev,
    InProgress,
    Review,
    Done,
    Optional,
    Cancelled,
    Deprecated,
}

impl WorkflowStatus {
    /// Parses a status value, returning `None` for anything outside the
    /// closed set.
    ///
    /// ```
    /// use sprintscope_tracker::types::WorkflowStatus;
    ///
    /// assert_eq!(WorkflowStatus::parse("ready-for-dev"), Some(WorkflowStatus::ReadyForDev));
    /// assert_eq!(WorkflowStatus::parse("blocked"), None);
    /// ```
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "backlog" => Some(Self::Backlog),
            "drafted" => Some(Self::Drafted),
            "contexted" => Some(Self::Contexted),
            "ready-for-dev" => Some(Self::ReadyForDev),
            "in-progress" => Some(Self::InProgress),
            "review" => Some(Self::Review),
            "done" => Some(Self::Done),
            "optional" => Some(Self::Optional),
            "cancelled" => Some(Self::Cancelled),
            "deprecated" => Some(Self::Deprecated),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backlog => "backlog",
            Self::Drafted => "drafted",
            Self::Contexted => "contexted",
            Self::ReadyForDev => "ready-for-dev",
            Self::InProgress => "in-progress",
            Self::Review => "review",
            Self::Done => "done",
            Self::Optional => "optional",
            Self::Cancelled => "cancelled",
            Self::Deprecated => "deprecated",
        }
    }

    /// Epics in these states are skipped when choosing the current story.
    #[must_use]
    pub fn is_retired(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Deprecated)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One story: a markdown file, or a planned placeholder without one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryData {
    /// `None` for planned stories that have no file yet.
    pub file_path: Option<PathBuf>,
    /// Canonical identifier such as `1.2`.
    pub identifier: String,
    pub title: String,
    pub tasks: Vec<TaskItem>,
    pub completed_count: u32,
    pub total_count: u32,
    pub percentage: u8,
    pub file_status: FileStatus,
    pub workflow_status: WorkflowStatus,
    pub last_modified: Option<DateTime<Utc>>,
}

impl StoryData {
    /// Builds a file-less placeholder for a story known only from the status
    /// document or an epic plan.
    #[must_use]
    pub fn planned(identifier: &str, title: &str, workflow_status: WorkflowStatus) -> Self {
        Self {
            file_path: None,
            identifier: identifier.to_string(),
            title: title.to_string(),
            tasks: Vec::new(),
            completed_count: 0,
            total_count: 0,
            percentage: 0,
            file_status: FileStatus::NotStarted,
            workflow_status,
            last_modified: None,
        }
    }

    /// The epic part of the identifier (`1` for `1.2`, `gds-3` for `gds-3.1`).
    #[must_use]
    pub fn epic_identifier(&self) -> Option<&str> {
        self.identifier.rsplit_once('.').map(|(epic, _)| epic)
    }

    /// Numeric story suffix (`2` for `1.2`), `0` when there is none.
    #[must_use]
    pub fn story_number(&self) -> u32 {
        self.identifier
            .rsplit_once('.')
            .map_or(0, |(_, story)| numeric_key(story))
    }

    #[must_use]
    pub fn has_file(&self) -> bool {
        self.file_path.is_some()
    }
}

/// A group of stories with its roll-up counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpicData {
    pub identifier: String,
    pub display_name: String,
    pub goal: Option<String>,
    /// Per-epic folder, or the stories directory for flat layouts.
    pub source_path: Option<PathBuf>,
    /// File-backed stories, ordered by story number.
    pub stories: Vec<StoryData>,
    /// Stories named by the status document or a plan but with no file yet.
    /// They carry no tasks and never contribute to roll-ups.
    pub planned_stories: Vec<StoryData>,
    pub completed_count: u32,
    pub total_count: u32,
    pub percentage: u8,
    pub workflow_status: WorkflowStatus,
}

/// Authoritative statuses and annotations from `sprint-status.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SprintStatus {
    pub project_name: Option<String>,
    pub story_location_hint: Option<String>,
    pub epic_status_by_key: BTreeMap<String, WorkflowStatus>,
    pub story_status_by_key: BTreeMap<String, WorkflowStatus>,
    pub epic_goal_by_key: BTreeMap<String, String>,
    pub epic_title_by_key: BTreeMap<String, String>,
}

/// A story mined from an epic plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedStory {
    pub identifier: String,
    pub epic_identifier: String,
    pub title: String,
}

/// An epic mined from an epic plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedEpic {
    pub identifier: String,
    pub title: String,
    pub goal: Option<String>,
    pub stories: Vec<PlannedStory>,
}

/// Merged catalog of every epic plan file in the epics directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpicsPlan {
    pub project_name: Option<String>,
    pub epics: Vec<PlannedEpic>,
    pub stories_by_identifier: HashMap<String, PlannedStory>,
}

impl EpicsPlan {
    #[must_use]
    pub fn epic(&self, identifier: &str) -> Option<&PlannedEpic> {
        self.epics.iter().find(|epic| epic.identifier == identifier)
    }
}

/// The snapshot handed to consumers after every refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectProgress {
    pub root_path: PathBuf,
    pub project_name: String,
    pub version: StructureVersion,
    pub stories_path: PathBuf,
    pub epics: Vec<EpicData>,
    pub current_story: Option<StoryData>,
    pub total_tasks: u32,
    pub completed_tasks: u32,
    pub percentage: u8,
    /// File-backed stories across all epics.
    pub story_count: u32,
    /// Tasks completed since tracking started.
    pub tasks_this_session: u32,
    /// Tasks completed since the last git commit.
    pub tasks_since_commit: u32,
}

impl ProjectProgress {
    /// Looks up a file-backed or planned story by identifier.
    #[must_use]
    pub fn find_story(&self, identifier: &str) -> Option<&StoryData> {
        self.epics
            .iter()
            .flat_map(|epic| epic.stories.iter().chain(epic.planned_stories.iter()))
            .find(|story| story.identifier == identifier)
    }

    /// Renders the snapshot as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Json`](crate::error::TrackerError::Json) if
    /// serialization fails.
    pub fn to_json_pretty(&self) -> crate::error::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Paths of every story file in the snapshot, in display order.
    #[must_use]
    pub fn story_files(&self) -> Vec<PathBuf> {
        self.epics
            .iter()
            .flat_map(|epic| epic.stories.iter())
            .filter_map(|story| story.file_path.clone())
            .collect()
    }
}
