//! Story file parser.
//!
//! Turns one markdown story file into a [`StoryData`]: a title, a canonical
//! identifier, and a tree of checkbox tasks whose nesting follows the
//! indentation of the list items.
//!
//! # Task syntax
//!
//! Only lines of the exact form `- [ ] text`, `- [x] text` or `- [X] text`
//! (with optional leading whitespace) are tasks. Anything else, including
//! `- [  ] text`, `-[ ] text` and `- [ ]text`, is ordinary prose.
//!
//! ```
//! use sprintscope_tracker::parsers::story::parse_tasks;
//!
//! let tasks = parse_tasks("- [ ] A\n  - [ ] B\n  - [x] C\n- [x] D\n");
//! assert_eq!(tasks.len(), 2);
//! assert_eq!(tasks[0].children.len(), 2);
//! assert!(tasks[1].completed);
//! ```
//!
//! # Failure policy
//!
//! [`parse_story_file`] never returns an error: a file that cannot be read or
//! stat'ed is logged and reported as `None`, so one bad file never aborts the
//! rest of the directory.

use std::path::Path;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use tracing::{trace, warn};

use crate::types::{
    count_tasks, percentage, FileStatus, SprintStatus, StoryData, TaskItem, WorkflowStatus,
};

static CHECKBOX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)- \[( |x|X)\] (.+)$").unwrap());

static STORY_FILENAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bstory[-_ ]?(\d+)(?:[-_.](\d+))?").unwrap());

static FLAT_FILENAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)-(\d+)-").unwrap());

static STORY_PHRASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bstory\s+(\d+)\.(\d+)").unwrap());

static H1: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^#\s+(.+)$").unwrap());

/// Number of leading lines searched for a `Story N.M` phrase.
const IDENTIFIER_SCAN_LINES: usize = 10;

/// Reads and parses a story file.
///
/// The workflow status is looked up in `status` under the story's identifier
/// and defaults to `backlog`.
pub async fn parse_story_file(path: &Path, status: Option<&SprintStatus>) -> Option<StoryData> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read story file");
            return None;
        }
    };

    let last_modified = match tokio::fs::metadata(path).await.and_then(|m| m.modified()) {
        Ok(modified) => DateTime::<Utc>::from(modified),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to stat story file");
            return None;
        }
    };

    let mut story = parse_story_content(path, &content, Some(last_modified));
    if let Some(workflow) = status.and_then(|s| s.story_status_by_key.get(&story.identifier)) {
        story.workflow_status = *workflow;
    }

    trace!(
        path = %path.display(),
        identifier = %story.identifier,
        completed = story.completed_count,
        total = story.total_count,
        "Parsed story file"
    );

    Some(story)
}

/// Parses story content that has already been read.
///
/// This is a pure function of its inputs; the workflow status is left at its
/// default.
#[must_use]
pub fn parse_story_content(
    path: &Path,
    content: &str,
    last_modified: Option<DateTime<Utc>>,
) -> StoryData {
    let tasks = parse_tasks(content);
    let (completed_count, total_count) = count_tasks(&tasks);

    StoryData {
        file_path: Some(path.to_path_buf()),
        identifier: extract_identifier(path, content),
        title: extract_title(path, content),
        tasks,
        completed_count,
        total_count,
        percentage: percentage(completed_count, total_count),
        file_status: FileStatus::from_counts(completed_count, total_count),
        workflow_status: WorkflowStatus::default(),
        last_modified,
    }
}

/// A task that has been seen but whose children are not yet attached.
struct FlatTask {
    item: TaskItem,
    parent: Option<usize>,
}

/// Builds the checkbox task tree in a single pass over the lines.
///
/// A stack of open ancestors, keyed by indent width, decides the parent of
/// each new task: ancestors indented at or beyond the new line are closed
/// first, and the deepest remaining one becomes the parent.
#[must_use]
pub fn parse_tasks(content: &str) -> Vec<TaskItem> {
    let mut flat: Vec<FlatTask> = Vec::new();
    let mut open: Vec<(usize, usize)> = Vec::new();

    for (index, line) in content.lines().enumerate() {
        let Some(caps) = CHECKBOX.captures(line) else {
            continue;
        };
        let text = caps[3].trim();
        if text.is_empty() {
            continue;
        }
        let indent = caps[1].chars().count();

        while open.last().is_some_and(|&(open_indent, _)| open_indent >= indent) {
            open.pop();
        }

        let node = flat.len();
        flat.push(FlatTask {
            item: TaskItem {
                text: text.to_string(),
                completed: &caps[2] != " ",
                source_line: index + 1,
                children: Vec::new(),
            },
            parent: open.last().map(|&(_, parent)| parent),
        });
        open.push((indent, node));
    }

    assemble(flat)
}

/// Attaches every flat task to its parent, preserving document order.
fn assemble(flat: Vec<FlatTask>) -> Vec<TaskItem> {
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); flat.len()];
    let mut roots = Vec::new();
    for (index, task) in flat.iter().enumerate() {
        match task.parent {
            Some(parent) => children[parent].push(index),
            None => roots.push(index),
        }
    }

    let mut items: Vec<Option<TaskItem>> = flat.into_iter().map(|task| Some(task.item)).collect();

    // Children always come after their parent, so building from the back
    // guarantees every child is complete before it is moved.
    for index in (0..items.len()).rev() {
        let built: Vec<TaskItem> = children[index]
            .iter()
            .filter_map(|&child| items[child].take())
            .collect();
        if let Some(item) = items[index].as_mut() {
            item.children = built;
        }
    }

    roots
        .into_iter()
        .filter_map(|root| items[root].take())
        .collect()
}

/// Derives the story identifier.
///
/// Tries, in order: a flat `N-M-slug` file name, a standalone `story N` /
/// `story N.M` word in the file name, a `Story N.M` phrase in the first ten
/// lines, and finally the bare file stem.
#[must_use]
pub fn extract_identifier(path: &Path, content: &str) -> String {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    if let Some(caps) = FLAT_FILENAME.captures(&file_name) {
        return format!("{}.{}", &caps[1], &caps[2]);
    }

    if let Some(caps) = STORY_FILENAME.captures(&file_name) {
        return match caps.get(2) {
            Some(story) => format!("{}.{}", &caps[1], story.as_str()),
            None => caps[1].to_string(),
        };
    }

    for line in content.lines().take(IDENTIFIER_SCAN_LINES) {
        if let Some(caps) = STORY_PHRASE.captures(line) {
            return format!("{}.{}", &caps[1], &caps[2]);
        }
    }

    file_stem(path)
}

/// Derives the story title from frontmatter, the first level-1 heading, or
/// the file stem.
#[must_use]
pub fn extract_title(path: &Path, content: &str) -> String {
    if let Some(title) = frontmatter_title(content) {
        return title;
    }

    for line in content.lines() {
        if let Some(caps) = H1.captures(line.trim_end()) {
            let heading = caps[1].trim();
            if !heading.is_empty() {
                return heading.to_string();
            }
        }
    }

    file_stem(path)
}

/// Extracts `title:` from a leading `---` delimited frontmatter block.
fn frontmatter_title(content: &str) -> Option<String> {
    let mut lines = content.lines();
    if lines.next()?.trim_end() != "---" {
        return None;
    }

    let block: Vec<&str> = lines.take_while(|line| line.trim_end() != "---").collect();
    let block = block.join("\n");

    let from_yaml = serde_yaml::from_str::<serde_yaml::Value>(&block)
        .ok()
        .and_then(|value| value.get("title").and_then(|t| t.as_str()).map(str::to_string));

    // Frontmatter that is not valid YAML still gets a line-based look.
    let title = from_yaml.or_else(|| {
        block.lines().find_map(|line| {
            line.trim()
                .strip_prefix("title:")
                .map(|rest| rest.trim().trim_matches(|c| c == '"' || c == '\'').to_string())
        })
    })?;

    let title = title.trim().to_string();
    (!title.is_empty()).then_some(title)
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_default()
}
