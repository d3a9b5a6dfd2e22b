//! `notify`-based event backend for non-macOS platforms.
//!
//! inotify and friends have no persistent event journal, so event ids
//! are synthesized per session and a persisted cursor is never a valid
//! resume point: the monitor always starts "since now" here and the
//! indexer falls back to its non-live paths.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use notify::event::{CreateKind, ModifyKind, RemoveKind};
use notify::{recommended_watcher, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::error::{Result, SeekError};

use super::{EventBatchSender, EventFlags, EventStream, WatchEvent};

/// Session-local event id counter. Monotone while the process lives.
static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

pub struct NotifyStream {
    watcher: Option<RecommendedWatcher>,
}

impl EventStream for NotifyStream {
    fn invalidate(&mut self) {
        self.watcher = None;
    }
}

/// Opens a recursive watcher over `roots`; `since` is ignored because
/// this backend cannot replay history.
pub fn open_stream(
    roots: &[PathBuf],
    since: Option<u64>,
    sender: EventBatchSender,
) -> Result<Box<dyn EventStream>> {
    if roots.is_empty() {
        return Err(SeekError::StreamCreate("no roots to watch".to_string()));
    }
    if since.is_some() {
        tracing::debug!("notify backend cannot replay history, starting from now");
    }

    let sender = Arc::new(sender);
    let mut watcher = recommended_watcher(move |result: notify::Result<Event>| match result {
        Ok(event) => {
            let Some(flags) = translate_kind(&event.kind) else {
                return;
            };
            let batch: Vec<WatchEvent> = event
                .paths
                .iter()
                .map(|path| WatchEvent {
                    path: path.clone(),
                    flags,
                    event_id: NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed),
                })
                .collect();
            if !batch.is_empty() {
                let _ = sender.send(batch);
            }
        }
        Err(error) => {
            tracing::error!(%error, "filesystem watcher error");
        }
    })
    .map_err(|error| SeekError::StreamCreate(error.to_string()))?;

    for root in roots {
        watcher
            .watch(root, RecursiveMode::Recursive)
            .map_err(|error| {
                SeekError::StreamStart(format!("watch {} failed: {error}", root.display()))
            })?;
    }

    Ok(Box::new(NotifyStream {
        watcher: Some(watcher),
    }))
}

/// A persisted cursor is never valid without kernel replay support.
pub fn probe_event_id(_roots: &[PathBuf], _event_id: u64) -> bool {
    false
}

fn translate_kind(kind: &EventKind) -> Option<EventFlags> {
    match kind {
        EventKind::Create(create) => {
            let mut flags = EventFlags::ITEM_CREATED;
            if matches!(create, CreateKind::Folder) {
                flags |= EventFlags::ITEM_IS_DIR;
            }
            Some(flags)
        }
        EventKind::Remove(remove) => {
            let mut flags = EventFlags::ITEM_REMOVED;
            if matches!(remove, RemoveKind::Folder) {
                flags |= EventFlags::ITEM_IS_DIR;
            }
            Some(flags)
        }
        EventKind::Modify(ModifyKind::Name(_)) => Some(EventFlags::ITEM_RENAMED),
        // Content and metadata changes are not structural; the index
        // row would not change.
        EventKind::Modify(_) | EventKind::Access(_) => None,
        EventKind::Any | EventKind::Other => None,
    }
}
