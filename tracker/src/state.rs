//! Per-root tracking state.
//!
//! [`ProjectStateManager`] runs detection once, then rebuilds the whole
//! [`ProjectProgress`] snapshot on every [`refresh`](ProjectStateManager::refresh).
//! Snapshots are immutable and replaced wholesale; consumers subscribe to a
//! zero-payload notification and re-fetch the latest snapshot.
//!
//! # States
//!
//! ```text
//! Uninitialized --initialize()--> Tracking --refresh()--> Tracking
//!       |                                      (failure keeps the
//!       +--(no structure found)                 previous snapshot)
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast::{self, Receiver, Sender};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::aggregator::aggregate;
use crate::config::TrackerSettings;
use crate::detector::detect;
use crate::error::{Result, TrackerError};
use crate::git_delta::tasks_since_last_commit;
use crate::parsers::epics_plan::parse_epics_plan;
use crate::parsers::sprint_status::load_sprint_status;
use crate::types::{
    percentage, DetectionResult, EpicData, FileStatus, ProjectProgress, StoryData,
    WorkflowStatus,
};

/// Capacity of the change notification channel.
pub const NOTIFY_CAPACITY: usize = 16;

/// Workflow statuses that make a story "current", highest priority first.
const CURRENT_STORY_PRIORITY: [WorkflowStatus; 3] = [
    WorkflowStatus::Review,
    WorkflowStatus::InProgress,
    WorkflowStatus::ReadyForDev,
];

/// Tracks one workspace root.
#[derive(Debug)]
pub struct ProjectStateManager {
    root: PathBuf,
    settings: TrackerSettings,
    detection: Option<DetectionResult>,
    snapshot: RwLock<Option<Arc<ProjectProgress>>>,
    baseline: RwLock<Option<u32>>,
    notifier: Sender<()>,
}

impl ProjectStateManager {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, settings: TrackerSettings) -> Self {
        let (notifier, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self {
            root: root.into(),
            settings,
            detection: None,
            snapshot: RwLock::new(None),
            baseline: RwLock::new(None),
            notifier,
        }
    }

    /// Detects the structure and, when one is found, performs the first
    /// refresh.
    ///
    /// The session baseline is taken from the first refresh that succeeds,
    /// which is this one unless the workspace is momentarily unreadable.
    /// Returns `false` when the root cannot be tracked.
    pub async fn initialize(&mut self) -> bool {
        let detection = detect(&self.root, self.settings.stories_override.as_deref());
        if !detection.is_trackable() {
            info!(root = %self.root.display(), "No project structure found");
            self.detection = None;
            return false;
        }

        self.detection = Some(detection);
        *self.baseline.get_mut() = None;
        self.refresh().await;
        true
    }

    /// Rebuilds the snapshot and notifies subscribers.
    ///
    /// Failures are logged and leave the previous snapshot in place. Returns
    /// whether a new snapshot was published.
    pub async fn refresh(&self) -> bool {
        match self.build_snapshot().await {
            Ok(progress) => {
                debug!(
                    root = %self.root.display(),
                    epics = progress.epics.len(),
                    completed = progress.completed_tasks,
                    total = progress.total_tasks,
                    current = ?progress.current_story.as_ref().map(|s| &s.identifier),
                    "Refreshed project snapshot"
                );
                self.record_baseline(progress.completed_tasks).await;
                *self.snapshot.write().await = Some(Arc::new(progress));
                // No subscribers is fine.
                let _ = self.notifier.send(());
                true
            }
            Err(e) => {
                warn!(
                    root = %self.root.display(),
                    error = %e,
                    "Refresh failed, keeping previous snapshot"
                );
                false
            }
        }
    }

    async fn record_baseline(&self, completed_tasks: u32) {
        let mut baseline = self.baseline.write().await;
        if baseline.is_none() {
            *baseline = Some(completed_tasks);
            debug!(baseline = completed_tasks, "Recorded session baseline");
        }
    }

    /// The latest snapshot, `None` before the first successful refresh.
    pub async fn snapshot(&self) -> Option<Arc<ProjectProgress>> {
        self.snapshot.read().await.clone()
    }

    /// Receives one `()` per published snapshot.
    #[must_use]
    pub fn subscribe(&self) -> Receiver<()> {
        self.notifier.subscribe()
    }

    #[must_use]
    pub fn detection(&self) -> Option<&DetectionResult> {
        self.detection.as_ref()
    }

    #[must_use]
    pub fn is_tracking(&self) -> bool {
        self.detection.is_some()
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Runs the full pipeline without touching the stored snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::NotTracking`] before a successful
    /// [`initialize`](Self::initialize), and propagates status document
    /// read or parse errors.
    pub async fn build_snapshot(&self) -> Result<ProjectProgress> {
        let detection = self.detection.as_ref().ok_or(TrackerError::NotTracking)?;
        let stories_path = &detection.stories_path;

        let mut status_dirs = vec![stories_path.clone()];
        status_dirs.extend(detection.epics_path.iter().cloned());
        let status = load_sprint_status(&status_dirs).await?;

        let plan = match &detection.epics_path {
            Some(epics_path) => parse_epics_plan(epics_path).await,
            None => None,
        };

        let epics = aggregate(stories_path, status.as_ref(), plan.as_ref()).await;
        let current_story = select_current_story(&epics);

        let completed_tasks: u32 = epics.iter().map(|e| e.completed_count).sum();
        let total_tasks: u32 = epics.iter().map(|e| e.total_count).sum();
        let story_count = epics.iter().map(|e| e.stories.len()).sum::<usize>();

        let tasks_this_session = self
            .baseline
            .read()
            .await
            .map_or(0, |baseline| completed_tasks.saturating_sub(baseline));

        let project_name = status
            .as_ref()
            .and_then(|s| s.project_name.clone())
            .or_else(|| plan.as_ref().and_then(|p| p.project_name.clone()))
            .unwrap_or_else(|| root_name(&self.root));

        let mut progress = ProjectProgress {
            root_path: self.root.clone(),
            project_name,
            version: detection.version,
            stories_path: stories_path.clone(),
            epics,
            current_story,
            total_tasks,
            completed_tasks,
            percentage: percentage(completed_tasks, total_tasks),
            story_count: u32::try_from(story_count).unwrap_or(u32::MAX),
            tasks_this_session,
            tasks_since_commit: 0,
        };

        if self.settings.git_enabled {
            progress.tasks_since_commit =
                tasks_since_last_commit(&self.root, &progress.story_files()).await;
        }
        Ok(progress)
    }
}

/// Picks the story the team is most likely working on.
///
/// Workflow statuses are tried in priority order across all active epics;
/// when none match, the most recently modified file-backed story whose
/// checkboxes are partly done is chosen.
#[must_use]
pub fn select_current_story(epics: &[EpicData]) -> Option<StoryData> {
    let active = || epics.iter().filter(|epic| !epic.workflow_status.is_retired());

    for wanted in CURRENT_STORY_PRIORITY {
        let found = active()
            .flat_map(|epic| epic.stories.iter().chain(epic.planned_stories.iter()))
            .find(|story| story.workflow_status == wanted);
        if let Some(story) = found {
            return Some(story.clone());
        }
    }

    let mut best: Option<&StoryData> = None;
    for story in active().flat_map(|epic| epic.stories.iter()) {
        if story.file_status != FileStatus::InProgress {
            continue;
        }
        // Strictly later only, so the first encountered wins ties.
        if best.is_none_or(|current| story.last_modified > current.last_modified) {
            best = Some(story);
        }
    }
    best.cloned()
}

fn root_name(root: &Path) -> String {
    root.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| root.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn story(identifier: &str, workflow: WorkflowStatus) -> StoryData {
        let mut story = StoryData::planned(identifier, identifier, workflow);
        story.file_path = Some(PathBuf::from(format!("/s/{identifier}.md")));
        story
    }

    fn in_progress_file(identifier: &str, modified_secs: i64) -> StoryData {
        let mut story = story(identifier, WorkflowStatus::Backlog);
        story.file_status = FileStatus::InProgress;
        story.last_modified = Utc.timestamp_opt(modified_secs, 0).single();
        story
    }

    fn epic(identifier: &str, workflow: WorkflowStatus, stories: Vec<StoryData>) -> EpicData {
        EpicData {
            identifier: identifier.to_string(),
            display_name: format!("Epic {identifier}"),
            goal: None,
            source_path: None,
            stories,
            planned_stories: Vec::new(),
            completed_count: 0,
            total_count: 0,
            percentage: 0,
            workflow_status: workflow,
        }
    }

    // =========================================================================
    // Current story selection
    // =========================================================================

    #[test]
    fn review_beats_earlier_in_progress() {
        let epics = vec![
            epic(
                "1",
                WorkflowStatus::InProgress,
                vec![
                    story("1.1", WorkflowStatus::ReadyForDev),
                    story("1.2", WorkflowStatus::InProgress),
                ],
            ),
            epic(
                "2",
                WorkflowStatus::InProgress,
                vec![story("2.1", WorkflowStatus::Review)],
            ),
        ];
        assert_eq!(select_current_story(&epics).unwrap().identifier, "2.1");
    }

    #[test]
    fn ready_for_dev_when_nothing_else() {
        let epics = vec![epic(
            "1",
            WorkflowStatus::Backlog,
            vec![
                story("1.1", WorkflowStatus::Done),
                story("1.2", WorkflowStatus::ReadyForDev),
            ],
        )];
        assert_eq!(select_current_story(&epics).unwrap().identifier, "1.2");
    }

    #[test]
    fn retired_epics_are_skipped() {
        let epics = vec![
            epic(
                "1",
                WorkflowStatus::Cancelled,
                vec![story("1.1", WorkflowStatus::Review)],
            ),
            epic(
                "2",
                WorkflowStatus::Deprecated,
                vec![in_progress_file("2.1", 50)],
            ),
            epic(
                "3",
                WorkflowStatus::Backlog,
                vec![story("3.1", WorkflowStatus::InProgress)],
            ),
        ];
        assert_eq!(select_current_story(&epics).unwrap().identifier, "3.1");
    }

    #[test]
    fn planned_placeholder_can_be_current() {
        let mut only = epic(
            "1",
            WorkflowStatus::Backlog,
            vec![story("1.1", WorkflowStatus::Done)],
        );
        only.planned_stories = vec![StoryData::planned("1.2", "Next", WorkflowStatus::ReadyForDev)];
        let current = select_current_story(&[only]).unwrap();
        assert_eq!(current.identifier, "1.2");
        assert!(!current.has_file());
    }

    #[test]
    fn fallback_prefers_latest_modification() {
        let epics = vec![
            epic("1", WorkflowStatus::Backlog, vec![in_progress_file("1.1", 100)]),
            epic("2", WorkflowStatus::Backlog, vec![in_progress_file("2.1", 300)]),
        ];
        assert_eq!(select_current_story(&epics).unwrap().identifier, "2.1");
    }

    #[test]
    fn fallback_ties_keep_first() {
        let epics = vec![epic(
            "1",
            WorkflowStatus::Backlog,
            vec![
                in_progress_file("1.1", 100),
                in_progress_file("1.2", 100),
            ],
        )];
        assert_eq!(select_current_story(&epics).unwrap().identifier, "1.1");
    }

    #[test]
    fn nothing_matches() {
        let epics = vec![epic(
            "1",
            WorkflowStatus::Backlog,
            vec![story("1.1", WorkflowStatus::Done)],
        )];
        assert!(select_current_story(&epics).is_none());
        assert!(select_current_story(&[]).is_none());
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    fn no_git() -> TrackerSettings {
        TrackerSettings {
            stories_override: None,
            git_enabled: false,
        }
    }

    #[tokio::test]
    async fn untrackable_root_stays_uninitialized() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = ProjectStateManager::new(dir.path(), no_git());

        assert!(!manager.initialize().await);
        assert!(!manager.is_tracking());
        assert!(manager.snapshot().await.is_none());
        assert!(matches!(
            manager.build_snapshot().await,
            Err(TrackerError::NotTracking)
        ));
    }

    #[tokio::test]
    async fn initialize_publishes_first_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let stories = dir.path().join("docs/stories");
        std::fs::create_dir_all(&stories).unwrap();
        std::fs::write(stories.join("1-1-a.md"), "- [x] a\n- [ ] b\n").unwrap();

        let mut manager = ProjectStateManager::new(dir.path(), no_git());
        let mut rx = manager.subscribe();
        assert!(manager.initialize().await);
        assert!(rx.try_recv().is_ok());

        let progress = manager.snapshot().await.unwrap();
        assert_eq!(progress.completed_tasks, 1);
        assert_eq!(progress.total_tasks, 2);
        assert_eq!(progress.percentage, 50);
        assert_eq!(progress.story_count, 1);
        assert_eq!(progress.tasks_this_session, 0);
        assert_eq!(
            progress.project_name,
            dir.path().file_name().unwrap().to_string_lossy()
        );
    }

    #[tokio::test]
    async fn session_delta_counts_from_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let stories = dir.path().join("stories");
        std::fs::create_dir_all(&stories).unwrap();
        let file = stories.join("1-1-a.md");
        std::fs::write(&file, "- [x] a\n- [ ] b\n- [ ] c\n").unwrap();

        let mut manager = ProjectStateManager::new(dir.path(), no_git());
        assert!(manager.initialize().await);

        std::fs::write(&file, "- [x] a\n- [x] b\n- [x] c\n").unwrap();
        assert!(manager.refresh().await);
        assert_eq!(manager.snapshot().await.unwrap().tasks_this_session, 2);

        std::fs::write(&file, "- [ ] a\n").unwrap();
        assert!(manager.refresh().await);
        assert_eq!(manager.snapshot().await.unwrap().tasks_this_session, 0);
    }

    #[tokio::test]
    async fn malformed_status_keeps_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let stories = dir.path().join("stories");
        std::fs::create_dir_all(&stories).unwrap();
        std::fs::write(stories.join("1-1-a.md"), "- [x] a\n").unwrap();

        let mut manager = ProjectStateManager::new(dir.path(), no_git());
        assert!(manager.initialize().await);
        let before = manager.snapshot().await.unwrap();

        std::fs::write(stories.join("sprint-status.yaml"), "development_status: [\n").unwrap();
        std::fs::write(stories.join("1-2-b.md"), "- [ ] b\n").unwrap();
        assert!(!manager.refresh().await);

        let after = manager.snapshot().await.unwrap();
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[tokio::test]
    async fn baseline_taken_from_first_successful_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let stories = dir.path().join("stories");
        std::fs::create_dir_all(&stories).unwrap();
        let file = stories.join("1-1-a.md");
        std::fs::write(&file, "- [x] a\n- [ ] b\n- [ ] c\n").unwrap();
        let status = stories.join("sprint-status.yaml");
        std::fs::write(&status, "development_status: [\n").unwrap();

        let mut manager = ProjectStateManager::new(dir.path(), no_git());
        assert!(manager.initialize().await);
        assert!(manager.snapshot().await.is_none());

        std::fs::write(&status, "development_status:\n  1-1-a: in-progress\n").unwrap();
        assert!(manager.refresh().await);
        assert_eq!(manager.snapshot().await.unwrap().tasks_this_session, 0);

        std::fs::write(&file, "- [x] a\n- [x] b\n- [x] c\n").unwrap();
        assert!(manager.refresh().await);
        let progress = manager.snapshot().await.unwrap();
        assert_eq!(progress.completed_tasks, 3);
        assert_eq!(progress.tasks_this_session, 2);
    }

    fn git(dir: &Path, args: &[&str]) -> bool {
        std::process::Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .is_ok_and(|output| output.status.success())
    }

    #[tokio::test]
    async fn snapshot_counts_tasks_since_commit() {
        let dir = tempfile::tempdir().unwrap();
        let ready = git(dir.path(), &["init", "-q"])
            && git(dir.path(), &["config", "user.email", "test@test.com"])
            && git(dir.path(), &["config", "user.name", "Test"]);
        if !ready {
            return;
        }
        let stories = dir.path().join("stories");
        std::fs::create_dir_all(&stories).unwrap();
        let file = stories.join("1-1-a.md");
        std::fs::write(&file, "- [x] a\n- [ ] b\n").unwrap();
        assert!(git(dir.path(), &["add", "."]));
        assert!(git(dir.path(), &["commit", "-q", "-m", "start"]));

        let settings = TrackerSettings {
            stories_override: None,
            git_enabled: true,
        };
        let mut manager = ProjectStateManager::new(dir.path(), settings);
        assert!(manager.initialize().await);
        assert_eq!(manager.snapshot().await.unwrap().tasks_since_commit, 0);

        std::fs::write(&file, "- [x] a\n- [x] b\n").unwrap();
        std::fs::write(stories.join("1-2-b.md"), "- [x] c\n").unwrap();
        assert!(manager.refresh().await);
        assert_eq!(manager.snapshot().await.unwrap().tasks_since_commit, 2);
    }

    #[test]
    fn root_name_uses_last_component() {
        assert_eq!(root_name(Path::new("/work/storefront")), "storefront");
    }
}
