//! Epic plan parser.
//!
//! Planning documents list epics and their stories before any story file
//! exists:
//!
//! ```markdown
//! project_name: storefront
//!
//! ## Epic 2: Checkout
//! **Goal:** Customers can pay for their cart
//!
//! ### Story 2.1: Cart summary
//! ### Story 2.2: Card payment
//! ```
//!
//! Every markdown file in the epics directory whose name contains `epic` is
//! parsed independently (plus the same files inside an `epics/` shard
//! folder), then the results are merged with first-occurrence-wins semantics.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::types::{EpicsPlan, PlannedEpic, PlannedStory};

/// Lines after an epic header searched for its goal line.
const GOAL_LOOKAHEAD: usize = 10;

/// Sub-folder holding one file per epic.
const SHARD_DIR: &str = "epics";

static EPIC_HEADER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^##\s+Epic\s+(\d+)\s*[:.\-]\s*(.+?)\s*$").unwrap());

static STORY_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^###\s+Story\s+(\d+)\.(\d+)\s*[:.\-]\s*(.+?)\s*$").unwrap()
});

static GOAL_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\*\*(?:Goal|Done when)\s*:?\*\*\s*:?\s*(.+?)\s*$").unwrap()
});

static PROJECT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*project_name:\s*(.+?)\s*$").unwrap());

/// Parses every epic plan file in `dir`.
///
/// Returns `None` when the directory cannot be listed or no epic headers were
/// found in any file.
pub async fn parse_epics_plan(dir: &Path) -> Option<EpicsPlan> {
    let mut files = list_plan_files(dir).await;
    files.extend(list_plan_files(&dir.join(SHARD_DIR)).await);

    let mut merged = EpicsPlan::default();
    for path in &files {
        let content = match tokio::fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read epic plan");
                continue;
            }
        };
        merge(&mut merged, parse_epics_content(&content));
    }

    if merged.epics.is_empty() {
        debug!(dir = %dir.display(), "No planned epics found");
        return None;
    }

    debug!(
        dir = %dir.display(),
        files = files.len(),
        epics = merged.epics.len(),
        stories = merged.stories_by_identifier.len(),
        "Loaded epic plans"
    );
    Some(merged)
}

/// Parses a single plan document.
#[must_use]
pub fn parse_epics_content(content: &str) -> EpicsPlan {
    let lines: Vec<&str> = content.lines().collect();
    let mut epics: Vec<PlannedEpic> = Vec::new();
    let mut stories_by_identifier: HashMap<String, PlannedStory> = HashMap::new();
    let mut current: Option<usize> = None;

    for (index, line) in lines.iter().enumerate() {
        let line = line.trim_end();

        if let Some(caps) = EPIC_HEADER.captures(line) {
            let goal = lines
                .iter()
                .skip(index + 1)
                .take(GOAL_LOOKAHEAD)
                .map(|next| next.trim())
                .take_while(|next| !next.starts_with('#'))
                .find_map(|next| GOAL_LINE.captures(next).map(|goal| goal[1].to_string()));

            epics.push(PlannedEpic {
                identifier: caps[1].to_string(),
                title: caps[2].to_string(),
                goal,
                stories: Vec::new(),
            });
            current = Some(epics.len() - 1);
            continue;
        }

        if let Some(caps) = STORY_HEADER.captures(line) {
            let story = PlannedStory {
                identifier: format!("{}.{}", &caps[1], &caps[2]),
                epic_identifier: caps[1].to_string(),
                title: caps[3].to_string(),
            };

            if let Some(epic) = current.and_then(|i| epics.get_mut(i)) {
                if epic.identifier == story.epic_identifier {
                    epic.stories.push(story.clone());
                }
            }
            stories_by_identifier
                .entry(story.identifier.clone())
                .or_insert(story);
        }
    }

    EpicsPlan {
        project_name: PROJECT_NAME
            .captures(content)
            .map(|caps| caps[1].trim_matches(|c| c == '"' || c == '\'').to_string())
            .filter(|name| !name.is_empty()),
        epics,
        stories_by_identifier,
    }
}

/// Folds `other` into `into`; anything already present wins.
fn merge(into: &mut EpicsPlan, other: EpicsPlan) {
    if into.project_name.is_none() {
        into.project_name = other.project_name;
    }
    for epic in other.epics {
        if into.epic(&epic.identifier).is_none() {
            into.epics.push(epic);
        }
    }
    for (identifier, story) in other.stories_by_identifier {
        into.stories_by_identifier.entry(identifier).or_insert(story);
    }
}

/// Markdown files in `dir` whose name contains `epic`, sorted by name.
async fn list_plan_files(dir: &Path) -> Vec<PathBuf> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };

    let mut files = Vec::new();
    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!(dir = %dir.display(), error = %e, "Failed to list epic plans");
                break;
            }
        };
        let name = entry.file_name().to_string_lossy().to_lowercase();
        let is_file = entry.file_type().await.is_ok_and(|t| t.is_file());
        if is_file && name.ends_with(".md") && name.contains("epic") {
            files.push(entry.path());
        }
    }
    files.sort();
    files
}
