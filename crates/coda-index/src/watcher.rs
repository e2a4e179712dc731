//! Filesystem watcher feeding the indexer with debounced updates.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::indexer::FileIndexer;

/// What to do with a changed path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchAction {
    /// (Re)index the file.
    Upsert,
    /// Remove the file from the index.
    Delete,
}

/// Default debounce window.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Queue capacity; overflowing events are dropped with a warning.
const QUEUE_CAPACITY: usize = 1000;

/// Watches a workspace and applies debounced incremental index updates.
pub struct WorkspaceWatcher {
    indexer: Arc<FileIndexer>,
    debounce: Duration,
    cancel: CancellationToken,
    watcher: Option<notify::RecommendedWatcher>,
    worker: Option<tokio::task::JoinHandle<()>>,
}

impl WorkspaceWatcher {
    /// Create a watcher over the indexer's workspace.
    pub fn new(indexer: Arc<FileIndexer>) -> Self {
        Self {
            indexer,
            debounce: DEFAULT_DEBOUNCE,
            cancel: CancellationToken::new(),
            watcher: None,
            worker: None,
        }
    }

    /// Override the debounce window. Intended for tests.
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Whether the watcher is running.
    pub fn is_running(&self) -> bool {
        self.watcher.is_some()
    }

    /// Start watching. Events are filtered at enqueue time by the same
    /// rules the indexer applies, pushed onto a bounded queue, and drained
    /// by a debouncing worker task.
    pub async fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Ok(());
        }
        self.indexer.ensure_collection().await?;

        let (tx, rx) = mpsc::channel::<(PathBuf, WatchAction)>(QUEUE_CAPACITY);
        let root = self.indexer.workspace_path().to_path_buf();
        let indexer = self.indexer.clone();
        let filter_indexer = self.indexer.clone();

        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            let event = match result {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(error = %e, "Watch event error");
                    return;
                }
            };
            for (rel_path, action) in normalize_event(&root, &event) {
                // Deletes of ignored/unindexable paths are filtered the
                // same way: they were never indexed.
                if !filter_indexer.is_path_indexable(&rel_path) {
                    continue;
                }
                if tx.try_send((rel_path, action)).is_err() {
                    tracing::warn!("Watcher queue full, dropping event");
                }
            }
        })?;
        watcher.watch(self.indexer.workspace_path(), RecursiveMode::Recursive)?;

        let cancel = self.cancel.clone();
        let debounce = self.debounce;
        let worker = tokio::spawn(async move {
            debounce_worker(indexer, rx, debounce, cancel).await;
        });

        self.watcher = Some(watcher);
        self.worker = Some(worker);
        tracing::info!(
            workspace_id = %self.indexer.workspace_id(),
            path = %self.indexer.workspace_path().display(),
            "Workspace watcher started"
        );
        Ok(())
    }

    /// Stop watching and wait for the worker to finish.
    pub async fn stop(&mut self) {
        self.cancel.cancel();
        self.watcher = None;
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
        tracing::info!(workspace_id = %self.indexer.workspace_id(), "Workspace watcher stopped");
    }
}

async fn debounce_worker(
    indexer: Arc<FileIndexer>,
    mut rx: mpsc::Receiver<(PathBuf, WatchAction)>,
    debounce: Duration,
    cancel: CancellationToken,
) {
    loop {
        let first = tokio::select! {
            _ = cancel.cancelled() => return,
            event = rx.recv() => match event {
                Some(event) => event,
                None => return,
            },
        };

        // Collect the rest of the burst, collapsing by path.
        let mut batch = vec![first];
        let deadline = Instant::now() + debounce;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                event = tokio::time::timeout(remaining, rx.recv()) => match event {
                    Ok(Some(event)) => batch.push(event),
                    Ok(None) => break,
                    Err(_) => break,
                },
            }
        }

        for (path, action) in collapse_events(batch) {
            let outcome = match action {
                WatchAction::Upsert => indexer.index_file(&path).await.map(|_| ()),
                WatchAction::Delete => indexer.delete_file(&path).await,
            };
            if let Err(e) = outcome {
                tracing::error!(path = %path.display(), error = %e, "Watcher update failed");
            }
        }
    }
}

/// Collapse a burst by path: the last action for a path wins, first-seen
/// order is preserved.
pub fn collapse_events(batch: Vec<(PathBuf, WatchAction)>) -> Vec<(PathBuf, WatchAction)> {
    let mut order: Vec<PathBuf> = Vec::new();
    let mut latest: HashMap<PathBuf, WatchAction> = HashMap::new();
    for (path, action) in batch {
        if !latest.contains_key(&path) {
            order.push(path.clone());
        }
        latest.insert(path, action);
    }
    order
        .into_iter()
        .map(|path| {
            let action = latest[&path];
            (path, action)
        })
        .collect()
}

/// Normalize a notify event into (relative path, action) pairs. Directory
/// events and paths outside the root yield nothing; moves expand to a
/// delete of the source plus an upsert of the destination.
fn normalize_event(root: &Path, event: &Event) -> Vec<(PathBuf, WatchAction)> {
    let rel = |path: &PathBuf| -> Option<PathBuf> {
        path.strip_prefix(root).ok().map(Path::to_path_buf)
    };

    match &event.kind {
        EventKind::Create(_) => event
            .paths
            .iter()
            .filter(|p| !p.is_dir())
            .filter_map(|p| rel(p).map(|r| (r, WatchAction::Upsert)))
            .collect(),
        EventKind::Remove(_) => event
            .paths
            .iter()
            .filter_map(|p| rel(p).map(|r| (r, WatchAction::Delete)))
            .collect(),
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::Both if event.paths.len() >= 2 => {
                let mut out = Vec::new();
                if let Some(src) = rel(&event.paths[0]) {
                    out.push((src, WatchAction::Delete));
                }
                if let Some(dest) = rel(&event.paths[1]) {
                    out.push((dest, WatchAction::Upsert));
                }
                out
            }
            RenameMode::From => event
                .paths
                .iter()
                .filter_map(|p| rel(p).map(|r| (r, WatchAction::Delete)))
                .collect(),
            RenameMode::To => event
                .paths
                .iter()
                .filter(|p| !p.is_dir())
                .filter_map(|p| rel(p).map(|r| (r, WatchAction::Upsert)))
                .collect(),
            _ => event
                .paths
                .iter()
                .filter_map(|p| {
                    let action = if p.exists() {
                        WatchAction::Upsert
                    } else {
                        WatchAction::Delete
                    };
                    rel(p).map(|r| (r, action))
                })
                .collect(),
        },
        EventKind::Modify(_) => event
            .paths
            .iter()
            .filter(|p| !p.is_dir())
            .filter_map(|p| rel(p).map(|r| (r, WatchAction::Upsert)))
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coda_store::Store;
    use coda_vector::{MemoryVectorStore, MockEmbedder, SharedEmbedder, SharedVectorStore};

    #[test]
    fn test_collapse_last_action_wins() {
        let a = PathBuf::from("a.py");
        let b = PathBuf::from("b.py");
        let collapsed = collapse_events(vec![
            (a.clone(), WatchAction::Upsert),
            (b.clone(), WatchAction::Upsert),
            (a.clone(), WatchAction::Delete),
        ]);
        assert_eq!(collapsed, vec![(a, WatchAction::Delete), (b, WatchAction::Upsert)]);
    }

    #[test]
    fn test_normalize_move_expands() {
        let root = PathBuf::from("/ws");
        let event = Event {
            kind: EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            paths: vec![PathBuf::from("/ws/old.py"), PathBuf::from("/ws/new.py")],
            attrs: Default::default(),
        };
        let actions = normalize_event(&root, &event);
        assert_eq!(
            actions,
            vec![
                (PathBuf::from("old.py"), WatchAction::Delete),
                (PathBuf::from("new.py"), WatchAction::Upsert),
            ]
        );
    }

    #[test]
    fn test_normalize_skips_outside_root() {
        let root = PathBuf::from("/ws");
        let event = Event {
            kind: EventKind::Remove(notify::event::RemoveKind::File),
            paths: vec![PathBuf::from("/elsewhere/x.py")],
            attrs: Default::default(),
        };
        assert!(normalize_event(&root, &event).is_empty());
    }

    #[tokio::test]
    async fn test_watcher_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let vector_store = std::sync::Arc::new(MemoryVectorStore::new());
        let store = Store::open_in_memory().unwrap();
        let indexer = Arc::new(FileIndexer::new(
            "ws1",
            "vscode",
            dir.path(),
            std::sync::Arc::new(MockEmbedder::new(8)) as SharedEmbedder,
            vector_store.clone() as SharedVectorStore,
            store.clone(),
        ));

        let mut watcher =
            WorkspaceWatcher::new(indexer.clone()).with_debounce(Duration::from_millis(50));
        watcher.start().await.unwrap();

        std::fs::write(dir.path().join("fresh.py"), "print(\"hi\")\n").unwrap();

        // Give the notify backend and the debounce window time to fire.
        let mut indexed = false;
        for _ in 0..40 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            if store.file_hash("ws1", "fresh.py").unwrap().is_some() {
                indexed = true;
                break;
            }
        }
        watcher.stop().await;
        assert!(indexed, "watcher did not index the new file");
    }
}
