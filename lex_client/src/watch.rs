//! Filesystem watching for previewed documents.
//!
//! Translates raw `notify` events for a fixed set of files into
//! [`DocumentEvent`]s on a [`DocumentEvents`] bus. Debouncing is left to the
//! preview listeners. Parent directories are watched rather than the files
//! themselves so editors that save through a temp file and rename still show
//! up as changes.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use lsp_types::Url;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

use crate::error::Result;
use crate::preview::{DocumentEvent, DocumentEvents};

/// Keeps the OS watcher alive; dropping it stops event delivery.
pub struct DocumentWatcher {
    _watcher: RecommendedWatcher,
    tracked: Arc<Mutex<HashSet<PathBuf>>>,
}

impl DocumentWatcher {
    /// Paths currently tracked (renames update this set).
    pub fn tracked(&self) -> Vec<PathBuf> {
        self.tracked
            .lock()
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }
}

/// Start watching `documents`, publishing their events on `events`.
pub fn watch_documents(documents: &[PathBuf], events: DocumentEvents) -> Result<DocumentWatcher> {
    let tracked: HashSet<PathBuf> = documents
        .iter()
        .map(|path| std::fs::canonicalize(path).unwrap_or_else(|_| path.clone()))
        .collect();
    let parents: HashSet<PathBuf> = tracked
        .iter()
        .filter_map(|path| path.parent().map(Path::to_path_buf))
        .collect();
    let tracked = Arc::new(Mutex::new(tracked));

    let sink = tracked.clone();
    let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
        match result {
            Ok(event) => {
                let Ok(mut tracked) = sink.lock() else {
                    return;
                };
                for doc_event in translate(&event, &mut tracked) {
                    debug!(?doc_event, "document event");
                    events.publish(doc_event);
                }
            }
            Err(e) => warn!("file watch error: {e}"),
        }
    })?;

    for dir in &parents {
        watcher.watch(dir, RecursiveMode::NonRecursive)?;
        debug!("watching {}", dir.display());
    }

    Ok(DocumentWatcher {
        _watcher: watcher,
        tracked,
    })
}

/// Map one raw event onto document events for tracked paths, following renames.
pub fn translate(event: &Event, tracked: &mut HashSet<PathBuf>) -> Vec<DocumentEvent> {
    let mut out = Vec::new();
    match event.kind {
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
            let (from, to) = (&event.paths[0], &event.paths[1]);
            if tracked.remove(from) {
                tracked.insert(to.clone());
                if let (Some(from), Some(to)) = (file_url(from), file_url(to)) {
                    out.push(DocumentEvent::Renamed { from, to });
                }
            } else if tracked.contains(to) {
                // A temp file replaced the document.
                out.extend(file_url(to).map(DocumentEvent::Changed));
            }
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => {}
        EventKind::Create(_) | EventKind::Modify(_) => {
            out.extend(
                event
                    .paths
                    .iter()
                    .filter(|path| tracked.contains(*path))
                    .filter_map(|path| file_url(path))
                    .map(DocumentEvent::Changed),
            );
        }
        EventKind::Remove(_) => {
            out.extend(
                event
                    .paths
                    .iter()
                    .filter(|path| tracked.contains(*path))
                    .filter_map(|path| file_url(path))
                    .map(DocumentEvent::Closed),
            );
        }
        _ => {}
    }
    out
}

fn file_url(path: &Path) -> Option<Url> {
    Url::from_file_path(path).ok()
}
