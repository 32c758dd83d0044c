//! Workspace layout detection.
//!
//! The methodology's on-disk conventions have changed from release to release,
//! so a workspace is classified by probing an ordered list of layout rules.
//! Detection looks only at which paths exist, never at file contents, which
//! keeps it a pure function of the existence check and easy to test without
//! touching the file system.
//!
//! # Rule order
//!
//! ```text
//! override path (if it exists)       -> QuickFlow
//! _bmad/ or .bmad/                   -> V6
//! _bmad-output/                      -> V6
//! .bmad-core/                        -> V4
//! docs/stories/                      -> V4
//! stories/, docs/sprint-artifacts/,
//! .stories/                          -> QuickFlow
//! nothing                            -> Unknown (empty stories path)
//! ```

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::types::{DetectionResult, StructureVersion};

/// Stories locations used by the current convention, most specific first.
const V6_STORIES: &[&str] = &[
    "_bmad-output/implementation-artifacts",
    "_bmad-output/sprint-artifacts",
    "_bmad-output/stories",
    "docs/sprint-artifacts",
    "docs/stories",
];

const V6_OUTPUT_STORIES: &[&str] = &[
    "_bmad-output/implementation-artifacts",
    "_bmad-output/sprint-artifacts",
    "_bmad-output/stories",
];

const V6_CONFIG: &[&str] = &[
    "_bmad/bmm/config.yaml",
    "_bmad/core/config.yaml",
    ".bmad/bmm/config.yaml",
    ".bmad/core/config.yaml",
];

const V6_EPICS: &[&str] = &["_bmad-output/planning-artifacts", "_bmad-output", "docs"];

const V4_EPICS: &[&str] = &["docs/prd", "docs"];

/// One layout convention: if any marker exists, the stories path is the
/// first existing candidate, or the first candidate when none exist.
struct LayoutRule {
    markers: &'static [&'static str],
    version: StructureVersion,
    stories: &'static [&'static str],
    config: &'static [&'static str],
}

const RULES: &[LayoutRule] = &[
    LayoutRule {
        markers: &["_bmad", ".bmad"],
        version: StructureVersion::V6,
        stories: V6_STORIES,
        config: V6_CONFIG,
    },
    LayoutRule {
        markers: &["_bmad-output"],
        version: StructureVersion::V6,
        stories: V6_OUTPUT_STORIES,
        config: &[],
    },
    LayoutRule {
        markers: &[".bmad-core"],
        version: StructureVersion::V4,
        stories: &["docs/stories"],
        config: &[".bmad-core/core-config.yaml"],
    },
    LayoutRule {
        markers: &["docs/stories"],
        version: StructureVersion::V4,
        stories: &["docs/stories"],
        config: &[],
    },
    LayoutRule {
        markers: &["stories"],
        version: StructureVersion::QuickFlow,
        stories: &["stories"],
        config: &[],
    },
    LayoutRule {
        markers: &["docs/sprint-artifacts"],
        version: StructureVersion::QuickFlow,
        stories: &["docs/sprint-artifacts"],
        config: &[],
    },
    LayoutRule {
        markers: &[".stories"],
        version: StructureVersion::QuickFlow,
        stories: &[".stories"],
        config: &[],
    },
];

/// Detects the layout of `root` using real file-system existence checks.
///
/// `override_path` may be absolute or relative to `root`.
#[must_use]
pub fn detect(root: &Path, override_path: Option<&Path>) -> DetectionResult {
    let result = detect_with(root, override_path, exists_on_disk);
    info!(
        root = %root.display(),
        version = %result.version,
        stories_path = %result.stories_path.display(),
        epics_path = ?result.epics_path,
        "Detected project structure"
    );
    result
}

/// Detects the layout of `root`, asking `exists` about every candidate path.
pub fn detect_with<F>(root: &Path, override_path: Option<&Path>, exists: F) -> DetectionResult
where
    F: Fn(&Path) -> bool,
{
    if let Some(override_path) = override_path {
        let stories_path = root.join(override_path);
        if exists(&stories_path) {
            let epics_path =
                resolve_epics(root, StructureVersion::QuickFlow, &stories_path, &exists);
            return DetectionResult {
                version: StructureVersion::QuickFlow,
                stories_path,
                config_path: None,
                epics_path,
            };
        }
        debug!(
            override_path = %stories_path.display(),
            "Stories override does not exist, falling back to detection"
        );
    }

    for rule in RULES {
        if !rule.markers.iter().any(|marker| exists(&root.join(marker))) {
            continue;
        }

        let stories_path = first_existing(root, rule.stories, &exists)
            .unwrap_or_else(|| root.join(rule.stories[0]));
        let config_path = first_existing(root, rule.config, &exists);
        let epics_path = resolve_epics(root, rule.version, &stories_path, &exists);

        return DetectionResult {
            version: rule.version,
            stories_path,
            config_path,
            epics_path,
        };
    }

    DetectionResult::unknown()
}

/// Config candidates must be files; markers, stories and epics paths must be
/// directories.
fn exists_on_disk(path: &Path) -> bool {
    if path.extension().is_some_and(|ext| ext == "yaml") {
        path.is_file()
    } else {
        path.is_dir()
    }
}

fn first_existing<F>(root: &Path, candidates: &[&str], exists: &F) -> Option<PathBuf>
where
    F: Fn(&Path) -> bool,
{
    candidates
        .iter()
        .map(|candidate| root.join(candidate))
        .find(|path| exists(path))
}

fn resolve_epics<F>(
    root: &Path,
    version: StructureVersion,
    stories_path: &Path,
    exists: &F,
) -> Option<PathBuf>
where
    F: Fn(&Path) -> bool,
{
    match version {
        StructureVersion::V6 => first_existing(root, V6_EPICS, exists),
        StructureVersion::V4 => first_existing(root, V4_EPICS, exists),
        StructureVersion::QuickFlow => {
            let mut candidates = vec![stories_path.to_path_buf()];
            if let Some(parent) = stories_path.parent() {
                candidates.push(parent.to_path_buf());
            }
            candidates.push(root.join("docs"));
            candidates.into_iter().find(|path| exists(path))
        }
        StructureVersion::Unknown => None,
    }
}
