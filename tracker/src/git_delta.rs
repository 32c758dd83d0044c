//! Completed-task delta against the last commit.
//!
//! For every story file the current completed-checkbox count is compared with
//! the count in the committed blob (`git show HEAD:./<path>`). Per-file
//! differences are summed as signed values and only the grand total is
//! clamped at zero. Any git unavailability yields zero.

use std::path::Path;

use tokio::process::Command;
use tracing::{debug, trace};

/// Counts literal `- [x]` / `- [X]` occurrences.
#[must_use]
pub fn count_completed_checkboxes(content: &str) -> u32 {
    let count = content.matches("- [x]").count() + content.matches("- [X]").count();
    u32::try_from(count).unwrap_or(u32::MAX)
}

/// Sums `(current, committed)` pairs and clamps the total at zero.
#[must_use]
pub fn sum_delta(pairs: &[(u32, u32)]) -> u32 {
    let total: i64 = pairs
        .iter()
        .map(|&(current, committed)| i64::from(current) - i64::from(committed))
        .sum();
    u32::try_from(total.max(0)).unwrap_or(u32::MAX)
}

/// Tasks completed in `files` since the last commit of the repository at
/// `root`.
pub async fn tasks_since_last_commit<P: AsRef<Path>>(root: &Path, files: &[P]) -> u32 {
    if !is_work_tree(root).await {
        trace!(root = %root.display(), "Not a git work tree, delta is zero");
        return 0;
    }

    let mut pairs = Vec::with_capacity(files.len());
    for file in files {
        let file = file.as_ref();
        let current = match tokio::fs::read_to_string(file).await {
            Ok(content) => count_completed_checkboxes(&content),
            Err(e) => {
                debug!(path = %file.display(), error = %e, "Skipping unreadable story file");
                continue;
            }
        };
        let committed = committed_content(root, file)
            .await
            .map_or(0, |content| count_completed_checkboxes(&content));
        pairs.push((current, committed));
    }

    let delta = sum_delta(&pairs);
    debug!(root = %root.display(), files = pairs.len(), delta, "Computed git delta");
    delta
}

async fn is_work_tree(root: &Path) -> bool {
    let result = Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(root)
        .output()
        .await;

    match result {
        Ok(output) => {
            output.status.success() && String::from_utf8_lossy(&output.stdout).trim() == "true"
        }
        Err(e) => {
            debug!(error = %e, "git not available");
            false
        }
    }
}

/// Content of `file` at `HEAD`, `None` when it has no committed version.
async fn committed_content(root: &Path, file: &Path) -> Option<String> {
    let relative = file.strip_prefix(root).unwrap_or(file);
    let spec = format!("HEAD:./{}", relative.to_string_lossy().replace('\\', "/"));

    let output = Command::new("git")
        .args(["show", &spec])
        .current_dir(root)
        .output()
        .await
        .ok()?;

    if !output.status.success() {
        trace!(path = %file.display(), "No committed version");
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}
