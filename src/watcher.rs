//! Policy-folder watcher driving incremental (re)indexing.
//!
//! Observes a designated folder for added, changed, and deleted documents
//! and feeds the corresponding ingest/delete requests into the engine. The
//! watcher never mutates the stores itself: events funnel through a
//! single-consumer queue, so mutations stay serialized and FIFO per path,
//! and checksum dedup makes redundant ingests cheap.
//!
//! Per-file failures are logged and the watcher moves on; one bad document
//! never stops the stream.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Result};
use notify::{EventKind, RecursiveMode};
use notify_debouncer_full::{new_debouncer, DebounceEventResult};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::engine::RagEngine;
use crate::extract;
use crate::models::Scope;

#[derive(Debug, Clone, PartialEq, Eq)]
enum WatchEvent {
    Upsert(PathBuf),
    Remove(PathBuf),
}

type FolderDebouncer =
    notify_debouncer_full::Debouncer<notify::RecommendedWatcher, notify_debouncer_full::RecommendedCache>;

/// Handle over a running watcher. Dropping it without [`PolicyWatcher::stop`]
/// aborts the queue worker without draining it.
pub struct PolicyWatcher {
    debouncer: Option<FolderDebouncer>,
    tx: mpsc::UnboundedSender<WatchEvent>,
    worker: tokio::task::JoinHandle<()>,
}

impl PolicyWatcher {
    /// Start watching `folder` for policy documents.
    ///
    /// When `watcher.auto_index` is set, existing supported files that are
    /// not yet indexed are enqueued first. When `watcher.watch` is set, a
    /// debounced subscription keeps the index in sync with later changes.
    pub async fn start(engine: Arc<RagEngine>, folder: &Path) -> Result<Self> {
        ensure!(
            folder.is_dir(),
            "watched folder does not exist: {}",
            folder.display()
        );
        let folder = folder.to_path_buf();
        let (tx, rx) = mpsc::unbounded_channel::<WatchEvent>();

        let worker = tokio::spawn(run_queue(engine.clone(), rx));

        if engine.config().watcher.auto_index {
            let enqueued = enumerate_existing(&engine, &folder, &tx).await?;
            info!(folder = %folder.display(), enqueued, "initial policy folder enumeration");
        }

        let debouncer = if engine.config().watcher.watch {
            let event_tx = tx.clone();
            let mut debouncer = new_debouncer(
                Duration::from_millis(engine.config().watcher.debounce_ms),
                None,
                move |result: DebounceEventResult| match result {
                    Ok(events) => {
                        // Within one debounce window the last event type wins
                        // for each path.
                        let mut latest: HashMap<PathBuf, WatchEvent> = HashMap::new();
                        for event in &events {
                            let make: fn(PathBuf) -> WatchEvent = match event.kind {
                                EventKind::Create(_) | EventKind::Modify(_) => WatchEvent::Upsert,
                                EventKind::Remove(_) => WatchEvent::Remove,
                                _ => continue,
                            };
                            for path in &event.paths {
                                if extract::is_supported(path) {
                                    latest.insert(path.clone(), make(path.clone()));
                                }
                            }
                        }
                        for (_, event) in latest {
                            let _ = event_tx.send(event);
                        }
                    }
                    Err(errors) => {
                        for e in errors {
                            warn!("file watcher error: {e:?}");
                        }
                    }
                },
            )?;
            debouncer.watch(folder.as_path(), RecursiveMode::Recursive)?;
            info!(folder = %folder.display(), "watching policy folder");
            Some(debouncer)
        } else {
            None
        };

        Ok(Self {
            debouncer,
            tx,
            worker,
        })
    }

    /// Tear down the subscription and drain the queue. The existing index is
    /// preserved.
    pub async fn stop(mut self) {
        self.debouncer.take();
        drop(self.tx);
        if let Err(e) = self.worker.await {
            warn!("watcher queue worker ended abnormally: {e}");
        }
        info!("policy watcher stopped");
    }
}

/// Single consumer over the event queue. Index and delete calls run one at a
/// time, in arrival order.
async fn run_queue(engine: Arc<RagEngine>, mut rx: mpsc::UnboundedReceiver<WatchEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            WatchEvent::Upsert(path) => {
                if !path.is_file() {
                    debug!(path = %path.display(), "skipping vanished file");
                    continue;
                }
                match engine.index_document(&path, Scope::PolicyManual).await {
                    Ok(report) if report.deduplicated => {
                        debug!(path = %path.display(), "unchanged, checksum dedup")
                    }
                    Ok(report) => {
                        info!(path = %path.display(), chunks = report.chunk_count, "watcher indexed document")
                    }
                    Err(e) => warn!(path = %path.display(), "watcher ingest failed: {e}"),
                }
            }
            WatchEvent::Remove(path) => match engine.document_id_by_path(&path).await {
                Ok(Some(doc_id)) => {
                    if let Err(e) = engine.delete_document(&doc_id).await {
                        warn!(path = %path.display(), "watcher delete failed: {e}");
                    }
                }
                Ok(None) => debug!(path = %path.display(), "removed file was not indexed"),
                Err(e) => warn!(path = %path.display(), "lookup for removed file failed: {e}"),
            },
        }
    }
}

/// Enqueue every supported file under `folder` that the metadata store does
/// not know yet.
async fn enumerate_existing(
    engine: &RagEngine,
    folder: &Path,
    tx: &mpsc::UnboundedSender<WatchEvent>,
) -> Result<usize> {
    let mut enqueued = 0usize;
    for entry in WalkDir::new(folder) {
        let entry = entry?;
        if !entry.file_type().is_file() || !extract::is_supported(entry.path()) {
            continue;
        }
        if engine.is_document_indexed(entry.path()).await? {
            continue;
        }
        let _ = tx.send(WatchEvent::Upsert(entry.path().to_path_buf()));
        enqueued += 1;
    }
    Ok(enqueued)
}
