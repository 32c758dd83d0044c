//! Sprint status document parser.
//!
//! `sprint-status.yaml` is the authoritative source of workflow status for
//! epics and stories:
//!
//! ```yaml
//! project: storefront
//! story_location: docs/stories
//!
//! # Epic 1: Accounts
//! # Goal: Customers can sign up and sign in
//! development_status:
//!   epic-1: in-progress
//!   1-1-sign-up: done
//!   1-2-sign-in: review
//!   epic-1-retrospective: optional
//! ```
//!
//! Keys are normalized to the identifiers used everywhere else (`epic-1` ->
//! `1`, `1-2-sign-in` -> `1.2`). Status values outside the closed set are
//! dropped, and retrospective entries are ignored. The `# Epic N:` and
//! `# Goal:` comments are recovered by a separate line scan because YAML
//! parsing discards them.
//!
//! Unlike the other parsers, malformed YAML is an error here: it propagates to
//! the refresh boundary, which keeps the previous snapshot.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde_yaml::Value;
use tracing::{debug, trace};

use crate::error::Result;
use crate::types::{SprintStatus, WorkflowStatus};

/// File name of the status document.
pub const SPRINT_STATUS_FILE: &str = "sprint-status.yaml";

/// Lines after an `# Epic N:` comment searched for its `# Goal:` line.
const GOAL_LOOKAHEAD: usize = 5;

static EPIC_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:([a-z][a-z0-9]*)-)?epic-(\d+)$").unwrap());

static STORY_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?:([a-z][a-z0-9]*)-)?(\d+)-(\d+)").unwrap());

static EPIC_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*#+\s*Epic\s+(\d+)\s*:\s*(.+?)\s*$").unwrap());

static GOAL_COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*#+\s*Goal\s*:\s*(.+?)\s*$").unwrap());

/// Parses the text of a sprint status document.
///
/// # Errors
///
/// Returns [`TrackerError::Yaml`](crate::error::TrackerError::Yaml) if the
/// document is not valid YAML.
pub fn parse_sprint_status(content: &str) -> Result<SprintStatus> {
    let root: Value = serde_yaml::from_str(content)?;
    let mut status = SprintStatus::default();

    if let Value::Mapping(map) = &root {
        status.project_name = ["project_name", "project"]
            .iter()
            .find_map(|key| scalar_string(map.get(*key)));
        status.story_location_hint = scalar_string(map.get("story_location"));

        if let Some(Value::Mapping(entries)) = map.get("development_status") {
            for (key, value) in entries {
                let (Some(key), Some(value)) = (key.as_str(), value.as_str()) else {
                    continue;
                };
                insert_entry(&mut status, key.trim(), value);
            }
        }
    }

    collect_comment_annotations(content, &mut status);
    Ok(status)
}

/// Loads the first status document found in `dirs`.
///
/// A missing file is the normal "no authoritative status" case and yields
/// `Ok(None)`; a file that exists but cannot be read or parsed is an error.
///
/// # Errors
///
/// Returns an I/O error for unreadable files and a YAML error for malformed
/// ones.
pub async fn load_sprint_status(dirs: &[PathBuf]) -> Result<Option<SprintStatus>> {
    for dir in dirs {
        let path = dir.join(SPRINT_STATUS_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let status = parse_sprint_status(&content)?;
                debug!(
                    path = %path.display(),
                    epics = status.epic_status_by_key.len(),
                    stories = status.story_status_by_key.len(),
                    "Loaded sprint status"
                );
                return Ok(Some(status));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                trace!(path = %path.display(), "No sprint status document");
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(None)
}

/// Returns the status document path inside `dir`.
#[must_use]
pub fn sprint_status_path(dir: &Path) -> PathBuf {
    dir.join(SPRINT_STATUS_FILE)
}

fn insert_entry(status: &mut SprintStatus, key: &str, value: &str) {
    if key.contains("retrospective") {
        return;
    }
    let Some(workflow) = WorkflowStatus::parse(value) else {
        trace!(key, value, "Dropping unrecognized workflow status");
        return;
    };

    if let Some(caps) = EPIC_KEY.captures(key) {
        let id = namespaced(caps.get(1).map(|m| m.as_str()), &caps[2]);
        status.epic_status_by_key.insert(id, workflow);
    } else if let Some(caps) = STORY_KEY.captures(key) {
        let id = namespaced(
            caps.get(1).map(|m| m.as_str()),
            &format!("{}.{}", &caps[2], &caps[3]),
        );
        status.story_status_by_key.insert(id, workflow);
    }
}

fn namespaced(namespace: Option<&str>, id: &str) -> String {
    match namespace {
        Some(ns) => format!("{ns}-{id}"),
        None => id.to_string(),
    }
}

fn scalar_string(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

/// Mines `# Epic N: Title` / `# Goal: text` comment pairs from the raw text.
fn collect_comment_annotations(content: &str, status: &mut SprintStatus) {
    let lines: Vec<&str> = content.lines().collect();

    for (index, line) in lines.iter().enumerate() {
        let Some(caps) = EPIC_COMMENT.captures(line) else {
            continue;
        };
        let epic = caps[1].to_string();
        status
            .epic_title_by_key
            .entry(epic.clone())
            .or_insert_with(|| caps[2].to_string());

        for next in lines.iter().skip(index + 1).take(GOAL_LOOKAHEAD) {
            if EPIC_COMMENT.is_match(next) {
                break;
            }
            if let Some(goal) = GOAL_COMMENT.captures(next) {
                status
                    .epic_goal_by_key
                    .entry(epic.clone())
                    .or_insert_with(|| goal[1].to_string());
                break;
            }
        }
    }
}
