//! Directory aggregation.
//!
//! Walks the stories directory and produces the ordered epic list that the
//! snapshot is built from. Two layouts are understood, and may be mixed:
//!
//! ```text
//! stories/
//! +-- 1-1-sign-up.md            flat: <epic>-<story>-<slug>.md
//! +-- 1-2-sign-in.md
//! +-- epic-2/                   per-epic folder (one level deep)
//! |   +-- story-2.1.md
//! |   +-- cart-notes.md
//! +-- sprint-status.yaml        never a story
//! +-- README.md                 never a story
//! ```
//!
//! Three sources feed the result and are consulted in a fixed precedence,
//! never merged destructively: the sprint status document (authoritative
//! workflow status, goals, titles), the story files themselves, and the epic
//! plan (titles and placeholders for stories that have no file yet).

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::parsers::story::parse_story_file;
use crate::types::{
    numeric_key, percentage, EpicData, EpicsPlan, SprintStatus, StoryData, WorkflowStatus,
};

static EPIC_DIR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^epic[-_]?(\d+)").unwrap());

static FLAT_STORY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)-(\d+)-.+\.md$").unwrap());

static STORY_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:[a-z][a-z0-9]*-)?\d+\.\d+$").unwrap());

/// Lowercase name fragments that mark a markdown file as not a story.
const DENYLIST: &[&str] = &["readme", "index", "tech-spec", "sprint-status", ".context."];

/// Stories discovered on disk for one epic, before roll-up.
#[derive(Default)]
struct EpicGroup {
    source_path: Option<PathBuf>,
    stories: Vec<StoryData>,
}

/// Builds the ordered epic list for `stories_path`.
///
/// A stories directory that cannot be listed yields an empty list.
pub async fn aggregate(
    stories_path: &Path,
    status: Option<&SprintStatus>,
    plan: Option<&EpicsPlan>,
) -> Vec<EpicData> {
    let mut groups: BTreeMap<String, EpicGroup> = BTreeMap::new();
    let mut seen: HashSet<String> = HashSet::new();

    let entries = match list_dir(stories_path).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(
                path = %stories_path.display(),
                error = %e,
                "Failed to read stories directory"
            );
            return Vec::new();
        }
    };

    for (path, is_dir) in entries {
        let name = file_name(&path);

        if is_dir {
            let Some(caps) = EPIC_DIR.captures(&name) else {
                continue;
            };
            let folder_epic = caps[1].to_string();
            scan_epic_folder(&path, &folder_epic, status, &mut groups, &mut seen).await;
        } else if let Some(caps) = FLAT_STORY.captures(&name) {
            if is_denied(&name) {
                continue;
            }
            let flat_epic = caps[1].to_string();
            if let Some(story) = parse_story_file(&path, status).await {
                let group = groups.entry(flat_epic).or_default();
                group.source_path.get_or_insert_with(|| stories_path.to_path_buf());
                push_unique(group, story, &mut seen);
            }
        }
    }

    let epics = build_epics(groups, status, plan);
    debug!(
        path = %stories_path.display(),
        epics = epics.len(),
        stories = seen.len(),
        "Aggregated stories directory"
    );
    epics
}

/// Parses the markdown files of one per-epic folder (not recursive).
async fn scan_epic_folder(
    folder: &Path,
    folder_epic: &str,
    status: Option<&SprintStatus>,
    groups: &mut BTreeMap<String, EpicGroup>,
    seen: &mut HashSet<String>,
) {
    let entries = match list_dir(folder).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %folder.display(), error = %e, "Failed to read epic folder");
            return;
        }
    };

    for (path, is_dir) in entries {
        let name = file_name(&path);
        if is_dir || !name.to_lowercase().ends_with(".md") || is_denied(&name) {
            continue;
        }
        let Some(mut story) = parse_story_file(&path, status).await else {
            continue;
        };
        scope_to_folder(&mut story, folder_epic, status);
        let epic = story
            .epic_identifier()
            .map_or_else(|| folder_epic.to_string(), str::to_string);
        let group = groups.entry(epic).or_default();
        group.source_path.get_or_insert_with(|| folder.to_path_buf());
        push_unique(group, story, seen);
    }
}

/// Prefixes an identifier without an epic number (`1`, `notes`, `1.1.story`)
/// with the folder's epic and looks its status up again under the new key.
fn scope_to_folder(story: &mut StoryData, folder_epic: &str, status: Option<&SprintStatus>) {
    if STORY_ID.is_match(&story.identifier) {
        return;
    }
    story.identifier = format!("{folder_epic}.{}", story.identifier.replace('.', "-"));
    story.workflow_status = status
        .and_then(|s| s.story_status_by_key.get(&story.identifier).copied())
        .unwrap_or_default();
}

fn push_unique(group: &mut EpicGroup, story: StoryData, seen: &mut HashSet<String>) {
    if seen.insert(story.identifier.clone()) {
        group.stories.push(story);
    } else {
        warn!(
            identifier = %story.identifier,
            path = ?story.file_path,
            "Duplicate story identifier, keeping the first file"
        );
    }
}

/// Turns the discovered groups plus status-only and plan-only epics into the
/// final, sorted epic list.
fn build_epics(
    mut groups: BTreeMap<String, EpicGroup>,
    status: Option<&SprintStatus>,
    plan: Option<&EpicsPlan>,
) -> Vec<EpicData> {
    // Epics with no files still show up so planned work stays visible.
    let known = status
        .into_iter()
        .flat_map(|s| s.epic_status_by_key.keys().cloned())
        .chain(plan.into_iter().flat_map(|p| p.epics.iter().map(|e| e.identifier.clone())));
    for identifier in known.collect::<Vec<_>>() {
        groups.entry(identifier).or_default();
    }

    let mut epics: Vec<EpicData> = groups
        .into_iter()
        .map(|(identifier, group)| build_epic(identifier, group, status, plan))
        .collect();
    epics.sort_by_key(|epic| numeric_key(&epic.identifier));
    epics
}

fn build_epic(
    identifier: String,
    group: EpicGroup,
    status: Option<&SprintStatus>,
    plan: Option<&EpicsPlan>,
) -> EpicData {
    let mut stories = group.stories;
    stories.sort_by_key(StoryData::story_number);

    let planned_epic = plan.and_then(|p| p.epic(&identifier));
    let planned_stories = planned_placeholders(&identifier, &stories, status, plan);

    let completed_count = stories.iter().map(|s| s.completed_count).sum();
    let total_count = stories.iter().map(|s| s.total_count).sum();

    let display_name = status
        .and_then(|s| s.epic_title_by_key.get(&identifier).cloned())
        .or_else(|| planned_epic.map(|e| e.title.clone()))
        .unwrap_or_else(|| format!("Epic {identifier}"));
    let goal = status
        .and_then(|s| s.epic_goal_by_key.get(&identifier).cloned())
        .or_else(|| planned_epic.and_then(|e| e.goal.clone()));
    let workflow_status = status
        .and_then(|s| s.epic_status_by_key.get(&identifier).copied())
        .unwrap_or_default();

    EpicData {
        identifier,
        display_name,
        goal,
        source_path: group.source_path,
        stories,
        planned_stories,
        completed_count,
        total_count,
        percentage: percentage(completed_count, total_count),
        workflow_status,
    }
}

/// Placeholders for stories named by the status document or the plan that
/// have no file in this epic.
fn planned_placeholders(
    epic: &str,
    stories: &[StoryData],
    status: Option<&SprintStatus>,
    plan: Option<&EpicsPlan>,
) -> Vec<StoryData> {
    let present: HashSet<&str> = stories.iter().map(|s| s.identifier.as_str()).collect();
    let mut placeholders: BTreeMap<String, StoryData> = BTreeMap::new();

    if let Some(status) = status {
        for (identifier, workflow) in &status.story_status_by_key {
            if belongs_to(identifier, epic) && !present.contains(identifier.as_str()) {
                let title = plan
                    .and_then(|p| p.stories_by_identifier.get(identifier))
                    .map_or(identifier.as_str(), |s| s.title.as_str());
                placeholders.insert(
                    identifier.clone(),
                    StoryData::planned(identifier, title, *workflow),
                );
            }
        }
    }

    if let Some(plan) = plan {
        for story in plan.stories_by_identifier.values() {
            if story.epic_identifier == epic
                && !present.contains(story.identifier.as_str())
                && !placeholders.contains_key(&story.identifier)
            {
                placeholders.insert(
                    story.identifier.clone(),
                    StoryData::planned(&story.identifier, &story.title, WorkflowStatus::Backlog),
                );
            }
        }
    }

    let mut placeholders: Vec<StoryData> = placeholders.into_values().collect();
    placeholders.sort_by_key(StoryData::story_number);
    placeholders
}

fn belongs_to(story_identifier: &str, epic: &str) -> bool {
    story_identifier
        .rsplit_once('.')
        .is_some_and(|(prefix, _)| prefix == epic)
}

fn is_denied(name: &str) -> bool {
    let lower = name.to_lowercase();
    DENYLIST.iter().any(|fragment| lower.contains(fragment))
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Lists direct entries of `dir` sorted by name, flagging directories.
async fn list_dir(dir: &Path) -> std::io::Result<Vec<(PathBuf, bool)>> {
    let mut reader = tokio::fs::read_dir(dir).await?;
    let mut entries = Vec::new();
    while let Some(entry) = reader.next_entry().await? {
        let is_dir = entry.file_type().await.is_ok_and(|t| t.is_dir());
        entries.push((entry.path(), is_dir));
    }
    entries.sort();
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::epics_plan::parse_epics_content;
    use crate::parsers::sprint_status::parse_sprint_status;
    use std::fs;

    fn write(dir: &Path, relative: &str, content: &str) {
        let path = dir.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn ids(stories: &[StoryData]) -> Vec<&str> {
        stories.iter().map(|s| s.identifier.as_str()).collect()
    }

    // =========================================================================
    // Layouts
    // =========================================================================

    #[tokio::test]
    async fn flat_layout_grouped_and_sorted() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "1-10-late.md", "- [x] a\n");
        write(dir.path(), "1-2-early.md", "- [ ] a\n- [x] b\n");
        write(dir.path(), "2-1-other.md", "- [ ] a\n");

        let epics = aggregate(dir.path(), None, None).await;
        assert_eq!(epics.len(), 2);
        assert_eq!(epics[0].identifier, "1");
        assert_eq!(ids(&epics[0].stories), vec!["1.2", "1.10"]);
        assert_eq!(epics[0].completed_count, 2);
        assert_eq!(epics[0].total_count, 3);
        assert_eq!(epics[0].percentage, 67);
        assert_eq!(epics[0].display_name, "Epic 1");
        assert_eq!(epics[0].source_path.as_deref(), Some(dir.path()));
        assert_eq!(epics[1].identifier, "2");
    }

    #[tokio::test]
    async fn per_epic_folders_scanned_one_level() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "epic-3/story-3.2.md", "- [x] a\n");
        write(dir.path(), "epic-3/notes.md", "# Notes\n- [ ] b\n");
        write(dir.path(), "epic-3/deeper/story-3.9.md", "- [ ] c\n");
        write(dir.path(), "epic-3/README.md", "- [ ] not a story\n");
        write(dir.path(), "misc/1-1-x.md", "- [ ] ignored folder\n");

        let epics = aggregate(dir.path(), None, None).await;
        assert_eq!(epics.len(), 1);
        assert_eq!(epics[0].identifier, "3");
        // `notes` is scoped to the folder's epic and sorts first.
        assert_eq!(ids(&epics[0].stories), vec!["3.notes", "3.2"]);
        assert_eq!(epics[0].source_path, Some(dir.path().join("epic-3")));
    }

    #[tokio::test]
    async fn denylisted_and_unconventional_files_skipped() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "1-1-real.md", "- [ ] a\n");
        write(dir.path(), "1-2-tech-spec.md", "- [ ] a\n");
        write(dir.path(), "1-3-story.context.md", "- [ ] a\n");
        write(dir.path(), "README.md", "- [ ] a\n");
        write(dir.path(), "sprint-status.yaml", "development_status: {}\n");
        write(dir.path(), "notes.md", "- [ ] a\n");

        let epics = aggregate(dir.path(), None, None).await;
        assert_eq!(epics.len(), 1);
        assert_eq!(ids(&epics[0].stories), vec!["1.1"]);
    }

    #[tokio::test]
    async fn missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(aggregate(&dir.path().join("missing"), None, None).await.is_empty());
    }

    #[tokio::test]
    async fn duplicate_identifiers_keep_first() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "1-1-first.md", "# First\n");
        write(dir.path(), "epic-1/story-1.1.md", "# Second\n");

        let epics = aggregate(dir.path(), None, None).await;
        assert_eq!(epics[0].stories.len(), 1);
        assert_eq!(epics[0].stories[0].title, "First");
    }

    #[tokio::test]
    async fn bare_story_numbers_scoped_to_their_folder() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "epic-1/story-1.md", "- [x] a\n");
        write(dir.path(), "epic-2/story-1.md", "- [x] b\n- [x] c\n");
        let status = parse_sprint_status("development_status:\n  2-1-cart: review\n").unwrap();

        let epics = aggregate(dir.path(), Some(&status), None).await;
        assert_eq!(epics.len(), 2);
        assert_eq!(ids(&epics[0].stories), vec!["1.1"]);
        assert_eq!(epics[0].total_count, 1);
        assert_eq!(ids(&epics[1].stories), vec!["2.1"]);
        assert_eq!(epics[1].completed_count, 2);
        assert_eq!(epics[1].stories[0].workflow_status, WorkflowStatus::Review);
        assert!(epics[1].planned_stories.is_empty());
    }

    #[tokio::test]
    async fn dotted_stem_in_epic_folder_creates_no_extra_epic() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "epic-4/1.1.story.md", "# Draft\n- [ ] a\n");

        let epics = aggregate(dir.path(), None, None).await;
        assert_eq!(epics.len(), 1);
        assert_eq!(epics[0].identifier, "4");
        assert_eq!(ids(&epics[0].stories), vec!["4.1-1-story"]);
    }

    #[tokio::test]
    async fn flat_slug_containing_story_keeps_flat_identifier() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "1-3-order-history-2.md", "- [x] a\n");
        let status =
            parse_sprint_status("development_status:\n  1-3-order-history-2: review\n").unwrap();

        let epics = aggregate(dir.path(), Some(&status), None).await;
        assert_eq!(epics.len(), 1);
        assert_eq!(ids(&epics[0].stories), vec!["1.3"]);
        assert_eq!(epics[0].stories[0].workflow_status, WorkflowStatus::Review);
        assert!(epics[0].planned_stories.is_empty());
    }

    // =========================================================================
    // Status and plan merging
    // =========================================================================

    #[tokio::test]
    async fn status_document_supplies_workflow_and_goals() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "1-1-sign-up.md", "- [x] a\n");
        let status = parse_sprint_status(
            "# Epic 1: Accounts\n# Goal: sign in works\n\
             development_status:\n  epic-1: in-progress\n  1-1-sign-up: done\n\
             \x20 1-2-sign-in: ready-for-dev\n  epic-4: backlog\n",
        )
        .unwrap();

        let epics = aggregate(dir.path(), Some(&status), None).await;
        assert_eq!(epics.len(), 2);

        let accounts = &epics[0];
        assert_eq!(accounts.workflow_status, WorkflowStatus::InProgress);
        assert_eq!(accounts.display_name, "Accounts");
        assert_eq!(accounts.goal.as_deref(), Some("sign in works"));
        assert_eq!(accounts.stories[0].workflow_status, WorkflowStatus::Done);
        assert_eq!(ids(&accounts.planned_stories), vec!["1.2"]);
        assert_eq!(
            accounts.planned_stories[0].workflow_status,
            WorkflowStatus::ReadyForDev
        );
        assert!(accounts.planned_stories[0].file_path.is_none());

        let status_only = &epics[1];
        assert_eq!(status_only.identifier, "4");
        assert!(status_only.stories.is_empty());
        assert_eq!(status_only.total_count, 0);
        assert_eq!(status_only.percentage, 0);
        assert!(status_only.source_path.is_none());
    }

    #[tokio::test]
    async fn plan_only_epics_and_placeholders() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "2-1-cart.md", "- [ ] a\n");
        let plan = parse_epics_content(
            "## Epic 2: Checkout\n**Goal:** pay\n### Story 2.1: Cart\n### Story 2.2: Payment\n\
             ## Epic 5: Reports\n### Story 5.1: Sales\n",
        );

        let epics = aggregate(dir.path(), None, Some(&plan)).await;
        let names: Vec<&str> = epics.iter().map(|e| e.display_name.as_str()).collect();
        assert_eq!(names, vec!["Checkout", "Reports"]);
        assert_eq!(epics[0].goal.as_deref(), Some("pay"));
        assert_eq!(ids(&epics[0].planned_stories), vec!["2.2"]);
        assert_eq!(epics[0].planned_stories[0].title, "Payment");
        assert_eq!(ids(&epics[1].planned_stories), vec!["5.1"]);
        assert_eq!(epics[1].total_count, 0);
    }

    #[tokio::test]
    async fn non_numeric_epics_sort_first() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "3-1-a.md", "- [ ] a\n");
        let status =
            parse_sprint_status("development_status:\n  gds-epic-1: backlog\n  epic-2: done\n")
                .unwrap();

        let epics = aggregate(dir.path(), Some(&status), None).await;
        let order: Vec<&str> = epics.iter().map(|e| e.identifier.as_str()).collect();
        assert_eq!(order, vec!["gds-1", "2", "3"]);
    }

    #[test]
    fn denylist_matching_is_case_insensitive() {
        assert!(is_denied("README.md"));
        assert!(is_denied("1-1-Tech-Spec.md"));
        assert!(!is_denied("1-1-login.md"));
    }
}
