//! File-system change source for watch mode.
//!
//! Watches the stories directory (and the epics directory when it is not
//! already covered) recursively, and forwards every relevant change to a
//! [`RefreshDebouncer`]. The notify callback only filters and queues paths;
//! refreshing happens on the receiving side of the debouncer.
//!
//! # Example
//!
//! ```no_run
//! use std::path::PathBuf;
//! use std::time::Duration;
//! use tokio::sync::mpsc;
//! use sprintscope_tracker::utils::RefreshDebouncer;
//! use sprintscope_tracker::watcher::ProjectWatcher;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (batch_tx, mut batch_rx) = mpsc::channel(8);
//!     let debouncer = RefreshDebouncer::new(Duration::from_millis(500), batch_tx);
//!     let _watcher = ProjectWatcher::new(&[PathBuf::from("docs/stories")], debouncer)?;
//!
//!     while let Some(batch) = batch_rx.recv().await {
//!         println!("{} files changed", batch.len());
//!     }
//!     Ok(())
//! }
//! ```

use std::path::{Path, PathBuf};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, error, trace, warn};

use crate::error::{Result, TrackerError};
use crate::utils::debounce::RefreshDebouncer;

/// Extensions whose changes can affect a snapshot.
const RELEVANT_EXTENSIONS: &[&str] = &["md", "yaml", "yml"];

/// Keeps the underlying notify watcher alive; dropping it stops watching.
#[derive(Debug)]
pub struct ProjectWatcher {
    _watcher: RecommendedWatcher,
    watched: Vec<PathBuf>,
}

impl ProjectWatcher {
    /// Starts watching the existing directories among `dirs`.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Watch`] when none of the directories exist or
    /// the platform watcher cannot be set up.
    pub fn new(dirs: &[PathBuf], debouncer: RefreshDebouncer) -> Result<Self> {
        let existing: Vec<PathBuf> = dirs
            .iter()
            .filter(|dir| {
                let found = dir.is_dir();
                if !found {
                    warn!(dir = %dir.display(), "Skipping missing watch directory");
                }
                found
            })
            .cloned()
            .collect();
        let watched = watch_roots(&existing);
        if watched.is_empty() {
            return Err(TrackerError::Watch("no directories to watch".to_string()));
        }

        let mut watcher = RecommendedWatcher::new(
            move |res: std::result::Result<Event, notify::Error>| {
                handle_notify_event(res, &debouncer);
            },
            Config::default(),
        )
        .map_err(|e| TrackerError::Watch(e.to_string()))?;

        for dir in &watched {
            watcher
                .watch(dir, RecursiveMode::Recursive)
                .map_err(|e| TrackerError::Watch(format!("{}: {e}", dir.display())))?;
            debug!(dir = %dir.display(), "Started recursive watch");
        }

        Ok(Self {
            _watcher: watcher,
            watched,
        })
    }

    #[must_use]
    pub fn watched_dirs(&self) -> &[PathBuf] {
        &self.watched
    }
}

/// Removes duplicates and directories nested inside another entry.
#[must_use]
pub fn watch_roots(dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut roots: Vec<PathBuf> = Vec::new();
    for dir in dirs {
        if roots.iter().any(|root| dir.starts_with(root)) {
            continue;
        }
        roots.retain(|root| !root.starts_with(dir));
        roots.push(dir.clone());
    }
    roots
}

/// Whether a change to `path` can affect a snapshot.
#[must_use]
pub fn is_relevant(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            RELEVANT_EXTENSIONS
                .iter()
                .any(|wanted| ext.eq_ignore_ascii_case(wanted))
        })
}

fn handle_notify_event(
    res: std::result::Result<Event, notify::Error>,
    debouncer: &RefreshDebouncer,
) {
    let event = match res {
        Ok(event) => event,
        Err(e) => {
            error!(error = %e, "File watcher error");
            return;
        }
    };

    trace!(kind = ?event.kind, paths = ?event.paths, "Received notify event");

    if !matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    ) {
        return;
    }

    for path in event.paths.iter().filter(|path| is_relevant(path)) {
        if !debouncer.try_send(path.clone()) {
            warn!(path = %path.display(), "Failed to queue change: channel full or closed");
        }
    }
}
