//! SprintScope - sprint progress from planning artifacts.
//!
//! # Commands
//!
//! - `sprintscope status`: Print the current snapshot (text or JSON)
//! - `sprintscope detect`: Print the detected workspace layout
//! - `sprintscope watch`: Keep tracking and print a line per change
//!
//! # Environment Variables
//!
//! See the [`config`](sprintscope_tracker::config) module for available
//! configuration options.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use sprintscope_tracker::config::{Config, ConfigOverrides};
use sprintscope_tracker::detector::detect;
use sprintscope_tracker::state::ProjectStateManager;
use sprintscope_tracker::types::{EpicData, ProjectProgress};
use sprintscope_tracker::utils::RefreshDebouncer;
use sprintscope_tracker::watcher::ProjectWatcher;

/// SprintScope - sprint progress from planning artifacts.
///
/// Reads story files, the sprint status document and epic plans of a
/// workspace and reports task completion per epic and story.
#[derive(Parser, Debug)]
#[command(name = "sprintscope")]
#[command(author, version, about, long_about = None)]
#[command(after_help = "\
ENVIRONMENT VARIABLES:
    SPRINTSCOPE_ROOT           Workspace root (default: current directory)
    SPRINTSCOPE_STORIES_PATH   Stories directory, skips layout detection
    SPRINTSCOPE_GIT            Tasks-since-commit via git (default: true)
    SPRINTSCOPE_DEBOUNCE_MS    Watch-mode quiet window (default: 500)
    RUST_LOG                   Log filter (default: info)

EXAMPLES:
    # Show progress for the current directory
    sprintscope status

    # Machine-readable snapshot
    sprintscope status --json > progress.json

    # Follow progress while editing stories
    sprintscope watch --root ~/work/storefront
")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

/// CLI subcommands.
#[derive(Subcommand, Debug)]
enum Command {
    /// Print the current progress snapshot.
    ///
    /// Exits with a non-zero status when no project structure is found.
    Status {
        #[command(flatten)]
        target: TargetArgs,

        /// Skip the git query for tasks completed since the last commit.
        #[arg(long)]
        no_git: bool,

        /// Print the snapshot as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the detected layout without reading any story.
    Detect {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// Track the workspace and print a summary line after every change.
    Watch {
        #[command(flatten)]
        target: TargetArgs,

        /// Skip the git query for tasks completed since the last commit.
        #[arg(long)]
        no_git: bool,

        /// Quiet window before refreshing, in milliseconds.
        #[arg(long)]
        debounce_ms: Option<u64>,
    },
}

/// Which workspace to look at.
#[derive(Args, Debug)]
struct TargetArgs {
    /// Workspace root.
    #[arg(short, long)]
    root: Option<PathBuf>,

    /// Stories directory, absolute or relative to the root.
    #[arg(short, long)]
    stories: Option<PathBuf>,
}

impl Command {
    /// Flags that take precedence over the environment.
    fn overrides(&self) -> Result<ConfigOverrides> {
        let (target, no_git, debounce_ms) = match self {
            Self::Detect { target } => (target, false, None),
            Self::Status { target, no_git, .. } => (target, *no_git, None),
            Self::Watch {
                target,
                no_git,
                debounce_ms,
            } => (target, *no_git, *debounce_ms),
        };
        if debounce_ms == Some(0) {
            bail!("--debounce-ms must be greater than 0");
        }

        Ok(ConfigOverrides {
            root: target.root.clone(),
            stories_override: target.stories.clone(),
            git_enabled: no_git.then_some(false),
            debounce_ms,
        })
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging();

    let overrides = cli.command.overrides()?;
    let config = Config::from_env_with(&overrides).context("Failed to load configuration")?;

    match cli.command {
        Command::Detect { .. } => run_detect(&config),
        Command::Status { json, .. } => runtime()?.block_on(run_status(config, json)),
        Command::Watch { .. } => runtime()?.block_on(run_watch(config)),
    }
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime")
}

fn run_detect(config: &Config) -> Result<()> {
    let result = detect(&config.root, config.stories_override.as_deref());
    if !result.is_trackable() {
        bail!("no project structure found under {}", config.root.display());
    }

    println!("version:  {}", result.version);
    println!("stories:  {}", result.stories_path.display());
    if let Some(config_path) = &result.config_path {
        println!("config:   {}", config_path.display());
    }
    if let Some(epics_path) = &result.epics_path {
        println!("epics:    {}", epics_path.display());
    }
    Ok(())
}

async fn run_status(config: Config, json: bool) -> Result<()> {
    let mut manager = ProjectStateManager::new(config.root.clone(), config.settings());
    if !manager.initialize().await {
        bail!("no project structure found under {}", config.root.display());
    }
    let Some(progress) = manager.snapshot().await else {
        bail!("no progress data for {}", config.root.display());
    };

    if json {
        let rendered = progress
            .to_json_pretty()
            .context("Failed to serialize snapshot")?;
        println!("{rendered}");
    } else {
        print_report(&progress);
    }
    Ok(())
}

async fn run_watch(config: Config) -> Result<()> {
    info!(root = %config.root.display(), "Starting SprintScope watch");

    let mut manager = ProjectStateManager::new(config.root.clone(), config.settings());
    let mut changes = manager.subscribe();
    if !manager.initialize().await {
        bail!("no project structure found under {}", config.root.display());
    }

    let detection = manager
        .detection()
        .cloned()
        .context("tracker lost its detection result")?;
    let mut watch_dirs = vec![detection.stories_path.clone()];
    watch_dirs.extend(detection.epics_path.clone());

    let (batch_tx, mut batch_rx) = mpsc::channel::<Vec<PathBuf>>(16);
    let debouncer = RefreshDebouncer::new(Duration::from_millis(config.debounce_ms), batch_tx);
    let watcher = ProjectWatcher::new(&watch_dirs, debouncer)
        .context("Failed to start file watcher")?;

    info!(
        version = %detection.version,
        dirs = ?watcher.watched_dirs(),
        debounce_ms = config.debounce_ms,
        "Watching for changes"
    );

    let shutdown = wait_for_shutdown();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(batch) = batch_rx.recv() => {
                debug!(changes = batch.len(), "Refreshing after file changes");
                manager.refresh().await;
            }
            notice = changes.recv() => {
                match notice {
                    Ok(()) => {
                        if let Some(progress) = manager.snapshot().await {
                            println!("{}", summary_line(&progress));
                        }
                    }
                    Err(e) => warn!(error = %e, "Missed change notifications"),
                }
            }
            () = &mut shutdown => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    drop(watcher);
    info!("SprintScope watch stopped");
    Ok(())
}

fn summary_line(progress: &ProjectProgress) -> String {
    let current = progress.current_story.as_ref().map_or_else(
        || "none".to_string(),
        |story| format!("{} {}", story.identifier, story.title),
    );
    format!(
        "{}: {}/{} tasks ({}%), +{} this session, +{} since commit, current: {}",
        progress.project_name,
        progress.completed_tasks,
        progress.total_tasks,
        progress.percentage,
        progress.tasks_this_session,
        progress.tasks_since_commit,
        current,
    )
}

fn print_report(progress: &ProjectProgress) {
    println!("{} ({})", progress.project_name, progress.version);
    println!("stories: {}", progress.stories_path.display());
    println!(
        "progress: {}/{} tasks ({}%) across {} stories",
        progress.completed_tasks, progress.total_tasks, progress.percentage, progress.story_count
    );
    println!("since last commit: +{}", progress.tasks_since_commit);
    match &progress.current_story {
        Some(story) => println!(
            "current: {} {} [{}]",
            story.identifier, story.title, story.workflow_status
        ),
        None => println!("current: none"),
    }

    for epic in &progress.epics {
        println!();
        print_epic(epic);
    }
}

fn print_epic(epic: &EpicData) {
    println!(
        "Epic {}: {} [{}] {}/{} ({}%)",
        epic.identifier,
        epic.display_name,
        epic.workflow_status,
        epic.completed_count,
        epic.total_count,
        epic.percentage
    );
    if let Some(goal) = &epic.goal {
        println!("  goal: {goal}");
    }
    for story in &epic.stories {
        println!(
            "  {:<8} {:<40} {:>3}% [{}]",
            story.identifier, story.title, story.percentage, story.workflow_status
        );
    }
    for story in &epic.planned_stories {
        println!(
            "  {:<8} {:<40}  -- [{}] (no file)",
            story.identifier, story.title, story.workflow_status
        );
    }
}

/// Initializes logging to stderr so stdout stays parseable.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .init();
}

/// Resolves on Ctrl+C or SIGTERM.
async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overrides(args: &[&str]) -> ConfigOverrides {
        Cli::try_parse_from(args)
            .expect("valid arguments")
            .command
            .overrides()
            .expect("valid overrides")
    }

    #[test]
    fn no_git_flag_overrides_environment() {
        let status = overrides(&["sprintscope", "status", "--no-git", "--root", "/ws"]);
        assert_eq!(status.git_enabled, Some(false));
        assert_eq!(status.root, Some(PathBuf::from("/ws")));

        let watch = overrides(&["sprintscope", "watch", "--debounce-ms", "250"]);
        assert_eq!(watch.git_enabled, None);
        assert_eq!(watch.debounce_ms, Some(250));
    }

    #[test]
    fn zero_debounce_flag_rejected() {
        let cli = Cli::try_parse_from(["sprintscope", "watch", "--debounce-ms", "0"]).unwrap();
        assert!(cli.command.overrides().is_err());
    }
}
