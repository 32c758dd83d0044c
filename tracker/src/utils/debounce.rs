//! Coalescing window for refresh triggers.
//!
//! Editors tend to produce bursts of file-system events for a single save
//! (write, rename, metadata change), and a status document update often
//! touches several stories at once. A full refresh per event would be
//! wasteful, so changed paths are collected until no new change has arrived
//! for the configured interval, then emitted as one sorted, de-duplicated
//! batch.
//!
//! # Example
//!
//! ```no_run
//! use std::path::PathBuf;
//! use std::time::Duration;
//! use tokio::sync::mpsc;
//! use sprintscope_tracker::utils::debounce::RefreshDebouncer;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (batch_tx, mut batch_rx) = mpsc::channel(8);
//!     let debouncer = RefreshDebouncer::new(Duration::from_millis(100), batch_tx);
//!
//!     debouncer.send(PathBuf::from("stories/1-1-a.md")).await.unwrap();
//!     debouncer.send(PathBuf::from("stories/1-2-b.md")).await.unwrap();
//!     debouncer.send(PathBuf::from("stories/1-1-a.md")).await.unwrap();
//!
//!     let batch = batch_rx.recv().await.unwrap();
//!     assert_eq!(batch.len(), 2);
//! }
//! ```

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

/// Input queue depth; changes beyond it are dropped by `try_send`.
const INPUT_CAPACITY: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DebouncerError {
    #[error("debouncer channel closed")]
    ChannelClosed,
}

/// Collects changed paths and emits them as one batch per quiet window.
#[derive(Debug)]
pub struct RefreshDebouncer {
    input_tx: mpsc::Sender<PathBuf>,
    #[allow(dead_code)]
    task_handle: tokio::task::JoinHandle<()>,
}

impl RefreshDebouncer {
    /// Spawns the coalescing task; batches are delivered on `output_tx`.
    #[must_use]
    pub fn new(interval: Duration, output_tx: mpsc::Sender<Vec<PathBuf>>) -> Self {
        let (input_tx, input_rx) = mpsc::channel(INPUT_CAPACITY);
        let task_handle = tokio::spawn(async move {
            run_debounce_loop(interval, input_rx, output_tx).await;
        });
        Self {
            input_tx,
            task_handle,
        }
    }

    /// Records a change and restarts the quiet window.
    ///
    /// # Errors
    ///
    /// Returns [`DebouncerError::ChannelClosed`] if the background task has
    /// stopped.
    pub async fn send(&self, path: PathBuf) -> Result<(), DebouncerError> {
        self.input_tx
            .send(path)
            .await
            .map_err(|_| DebouncerError::ChannelClosed)
    }

    /// Non-blocking variant for synchronous callers such as watcher
    /// callbacks. Returns `false` when the queue is full or closed.
    pub fn try_send(&self, path: PathBuf) -> bool {
        self.input_tx.try_send(path).is_ok()
    }
}

async fn run_debounce_loop(
    interval: Duration,
    mut input_rx: mpsc::Receiver<PathBuf>,
    output_tx: mpsc::Sender<Vec<PathBuf>>,
) {
    let mut pending: BTreeSet<PathBuf> = BTreeSet::new();
    let mut deadline: Option<Instant> = None;

    debug!(interval_ms = interval.as_millis(), "Starting debounce loop");

    loop {
        tokio::select! {
            change = input_rx.recv() => {
                match change {
                    Some(path) => {
                        trace!(path = %path.display(), "Change queued");
                        pending.insert(path);
                        deadline = Some(Instant::now() + interval);
                    }
                    None => {
                        debug!("Input channel closed, flushing pending changes");
                        emit(&mut pending, &output_tx).await;
                        break;
                    }
                }
            }

            () = async {
                match deadline {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            } => {
                deadline = None;
                emit(&mut pending, &output_tx).await;
            }
        }
    }

    debug!("Debounce loop terminated");
}

async fn emit(pending: &mut BTreeSet<PathBuf>, output_tx: &mpsc::Sender<Vec<PathBuf>>) {
    if pending.is_empty() {
        return;
    }
    let batch: Vec<PathBuf> = std::mem::take(pending).into_iter().collect();
    trace!(changes = batch.len(), "Emitting change batch");
    if let Err(e) = output_tx.send(batch).await {
        warn!(error = %e, "Failed to emit change batch");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{sleep, timeout};

    fn test_debouncer(interval_ms: u64) -> (RefreshDebouncer, mpsc::Receiver<Vec<PathBuf>>) {
        let (tx, rx) = mpsc::channel(16);
        (RefreshDebouncer::new(Duration::from_millis(interval_ms), tx), rx)
    }

    fn path(name: &str) -> PathBuf {
        PathBuf::from(format!("/stories/{name}"))
    }

    #[tokio::test]
    async fn burst_becomes_one_sorted_batch() {
        let (debouncer, mut rx) = test_debouncer(50);

        debouncer.send(path("b.md")).await.unwrap();
        debouncer.send(path("a.md")).await.unwrap();
        debouncer.send(path("b.md")).await.unwrap();

        let batch = timeout(Duration::from_millis(300), rx.recv())
            .await
            .expect("batch within timeout")
            .unwrap();
        assert_eq!(batch, vec![path("a.md"), path("b.md")]);

        let more = timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(more.is_err(), "Should not receive a second batch");
    }

    #[tokio::test]
    async fn window_restarts_on_each_change() {
        let (debouncer, mut rx) = test_debouncer(100);

        debouncer.send(path("a.md")).await.unwrap();
        sleep(Duration::from_millis(50)).await;
        debouncer.send(path("b.md")).await.unwrap();
        sleep(Duration::from_millis(50)).await;
        debouncer.send(path("c.md")).await.unwrap();

        let batch = timeout(Duration::from_millis(300), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch.len(), 3);
    }

    #[tokio::test]
    async fn nothing_emitted_before_interval() {
        let (debouncer, mut rx) = test_debouncer(150);
        debouncer.send(path("a.md")).await.unwrap();

        assert!(timeout(Duration::from_millis(50), rx.recv()).await.is_err());
        assert!(timeout(Duration::from_millis(300), rx.recv()).await.is_ok());
    }

    #[tokio::test]
    async fn separated_bursts_are_separate_batches() {
        let (debouncer, mut rx) = test_debouncer(30);

        debouncer.send(path("a.md")).await.unwrap();
        let first = timeout(Duration::from_millis(200), rx.recv()).await.unwrap().unwrap();
        debouncer.send(path("b.md")).await.unwrap();
        let second = timeout(Duration::from_millis(200), rx.recv()).await.unwrap().unwrap();

        assert_eq!(first, vec![path("a.md")]);
        assert_eq!(second, vec![path("b.md")]);
    }

    #[tokio::test]
    async fn pending_changes_flushed_on_drop() {
        let (debouncer, mut rx) = test_debouncer(5_000);
        assert!(debouncer.try_send(path("a.md")));
        drop(debouncer);

        let batch = timeout(Duration::from_millis(200), rx.recv())
            .await
            .expect("flush on close")
            .unwrap();
        assert_eq!(batch, vec![path("a.md")]);
    }

    #[test]
    fn error_display() {
        assert_eq!(
            DebouncerError::ChannelClosed.to_string(),
            "debouncer channel closed"
        );
    }
}
