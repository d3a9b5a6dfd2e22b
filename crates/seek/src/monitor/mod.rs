//! Live change monitor: consumes the kernel event stream, batches
//! structural changes, and keeps the store plus its event-id cursor in
//! sync with the filesystem.
//!
//! Two background threads per monitoring session: a consumer that owns
//! the pending-path set (threshold + one-shot-timer flush) and a DB
//! worker that turns drained paths into upserts/deletes against
//! filesystem truth, then checkpoints the batch's max event id.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};

use crate::error::{Result, SeekError};
use crate::indexer::EventCursorProbe;
use crate::policy::ExclusionPolicy;
use crate::storage::entry::EntryFactory;
use crate::storage::Store;
use crate::types::{MonitorState, MonitoringStatus};
use crate::watcher::{
    platform_cursor_probe, platform_stream_factory, CursorProbeFn, EventFlags, EventStream,
    StreamFactory, WatchEvent,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Batching knobs for the monitor.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub roots: Vec<PathBuf>,
    /// Pending-set size that triggers an immediate flush.
    pub batch_threshold: usize,
    /// One-shot timer delay before a partial batch flushes.
    pub flush_delay: Duration,
}

impl MonitorConfig {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots,
            batch_threshold: 50,
            flush_delay: Duration::from_secs(2),
        }
    }
}

/// A drained batch handed to the DB worker: paths plus the highest
/// event id observed when the batch was cut.
type DbBatch = (Vec<PathBuf>, u64);

struct MonitorRuntime {
    stream: Box<dyn EventStream>,
    stop_tx: Sender<()>,
    consumer: Option<JoinHandle<()>>,
    db_worker: Option<JoinHandle<()>>,
}

// ---------------------------------------------------------------------------
// ChangeMonitor
// ---------------------------------------------------------------------------

pub struct ChangeMonitor {
    store: Store,
    policy: Arc<ExclusionPolicy>,
    factory: EntryFactory,
    config: MonitorConfig,
    state: Mutex<MonitorState>,
    pending: Arc<RwLock<HashSet<PathBuf>>>,
    runtime: Mutex<Option<MonitorRuntime>>,
    stream_factory: StreamFactory,
    cursor_probe: CursorProbeFn,
}

impl std::fmt::Debug for ChangeMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeMonitor")
            .field("roots", &self.config.roots)
            .field("state", &self.state())
            .finish()
    }
}

impl ChangeMonitor {
    pub fn new(
        store: Store,
        policy: Arc<ExclusionPolicy>,
        factory: EntryFactory,
        config: MonitorConfig,
    ) -> Self {
        Self::with_backend(
            store,
            policy,
            factory,
            config,
            platform_stream_factory(),
            platform_cursor_probe(),
        )
    }

    /// Full constructor with an injectable stream backend (test seam).
    pub fn with_backend(
        store: Store,
        policy: Arc<ExclusionPolicy>,
        factory: EntryFactory,
        config: MonitorConfig,
        stream_factory: StreamFactory,
        cursor_probe: CursorProbeFn,
    ) -> Self {
        Self {
            store,
            policy,
            factory,
            config,
            state: Mutex::new(MonitorState::Stopped),
            pending: Arc::new(RwLock::new(HashSet::new())),
            runtime: Mutex::new(None),
            stream_factory,
            cursor_probe,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
            .lock()
            .map(|state| *state)
            .unwrap_or(MonitorState::Stopped)
    }

    pub fn status(&self) -> MonitoringStatus {
        MonitoringStatus {
            state: self.state(),
            roots: self.config.roots.clone(),
            pending_updates: self.pending.read().map(|set| set.len()).unwrap_or(0),
            last_event_id: self.store.last_event_id().ok().flatten(),
        }
    }

    /// Starts monitoring, resuming from the persisted event id when the
    /// kernel still accepts it, from "now" otherwise. Idempotent while
    /// already active.
    pub fn start_monitoring_with_recovery(&self) -> Result<()> {
        {
            let mut state = self
                .state
                .lock()
                .map_err(|_| SeekError::StreamStart("monitor state lock poisoned".to_string()))?;
            match *state {
                MonitorState::Active | MonitorState::Starting => return Ok(()),
                MonitorState::Stopping | MonitorState::Stopped => *state = MonitorState::Starting,
            }
        }

        let since = self
            .store
            .last_event_id()
            .ok()
            .flatten()
            .filter(|id| (self.cursor_probe)(&self.config.roots, *id));
        match since {
            Some(id) => tracing::info!(event_id = id, "monitor resuming from persisted cursor"),
            None => tracing::info!("monitor starting from now"),
        }

        let (event_tx, event_rx) = unbounded::<Vec<WatchEvent>>();
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let (db_tx, db_rx) = unbounded::<DbBatch>();

        let db_worker = {
            let store = self.store.clone();
            let policy = self.policy.clone();
            let factory = self.factory.clone();
            thread::spawn(move || run_db_worker(db_rx, store, policy, factory))
        };

        let consumer = {
            let pending = self.pending.clone();
            let threshold = self.config.batch_threshold;
            let delay = self.config.flush_delay;
            thread::spawn(move || run_consumer(event_rx, stop_rx, pending, db_tx, threshold, delay))
        };

        let stream = match (self.stream_factory)(&self.config.roots, since, event_tx) {
            Ok(stream) => stream,
            Err(error) => {
                let _ = stop_tx.send(());
                let _ = consumer.join();
                let _ = db_worker.join();
                if let Ok(mut state) = self.state.lock() {
                    *state = MonitorState::Stopped;
                }
                return Err(error);
            }
        };

        if let Ok(mut runtime) = self.runtime.lock() {
            *runtime = Some(MonitorRuntime {
                stream,
                stop_tx,
                consumer: Some(consumer),
                db_worker: Some(db_worker),
            });
        }
        if let Ok(mut state) = self.state.lock() {
            *state = MonitorState::Active;
        }
        tracing::info!(roots = self.config.roots.len(), "change monitoring active");
        Ok(())
    }

    /// Invalidates the stream, cancels the flush timer, clears pending
    /// updates, and returns to `Stopped`.
    pub fn stop_monitoring(&self) {
        {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            if matches!(*state, MonitorState::Stopped | MonitorState::Stopping) {
                return;
            }
            *state = MonitorState::Stopping;
        }

        let runtime = self.runtime.lock().ok().and_then(|mut guard| guard.take());
        if let Some(mut runtime) = runtime {
            runtime.stream.invalidate();
            let _ = runtime.stop_tx.send(());
            if let Some(handle) = runtime.consumer.take() {
                let _ = handle.join();
            }
            if let Some(handle) = runtime.db_worker.take() {
                let _ = handle.join();
            }
        }

        if let Ok(mut pending) = self.pending.write() {
            pending.clear();
        }
        if let Ok(mut state) = self.state.lock() {
            *state = MonitorState::Stopped;
        }
        tracing::info!("change monitoring stopped");
    }

    /// True when the kernel accepts `event_id` as a resume point for
    /// `roots`. A rejection forces a full reindex upstream.
    pub fn is_event_id_valid(&self, event_id: u64, roots: &[PathBuf]) -> bool {
        (self.cursor_probe)(roots, event_id)
    }
}

impl EventCursorProbe for ChangeMonitor {
    fn is_event_id_valid(&self, event_id: u64, roots: &[PathBuf]) -> bool {
        ChangeMonitor::is_event_id_valid(self, event_id, roots)
    }
}

impl Drop for ChangeMonitor {
    fn drop(&mut self) {
        self.stop_monitoring();
    }
}

// ---------------------------------------------------------------------------
// Consumer thread
// ---------------------------------------------------------------------------

fn run_consumer(
    event_rx: Receiver<Vec<WatchEvent>>,
    stop_rx: Receiver<()>,
    pending: Arc<RwLock<HashSet<PathBuf>>>,
    db_tx: Sender<DbBatch>,
    batch_threshold: usize,
    flush_delay: Duration,
) {
    // No deadline means nothing is pending; the long fallback timeout
    // only bounds the select.
    const IDLE_TIMEOUT: Duration = Duration::from_secs(3600);

    let mut deadline: Option<Instant> = None;
    let mut max_event_id: u64 = 0;

    loop {
        let timeout = deadline
            .map(|at| at.saturating_duration_since(Instant::now()))
            .unwrap_or(IDLE_TIMEOUT);

        crossbeam_channel::select! {
            recv(event_rx) -> batch => {
                let Ok(batch) = batch else { break };
                let queued = accept_events(batch, &pending, &mut max_event_id);
                if queued == 0 {
                    continue;
                }
                let backlog = pending.read().map(|set| set.len()).unwrap_or(0);
                if backlog >= batch_threshold {
                    flush_pending(&pending, &db_tx, max_event_id);
                    deadline = None;
                } else {
                    deadline = Some(Instant::now() + flush_delay);
                }
            }
            recv(stop_rx) -> _ => break,
            default(timeout) => {
                if deadline.take().is_some() {
                    flush_pending(&pending, &db_tx, max_event_id);
                }
            }
        }
    }
}

/// Classifies a batch, queueing structural changes. Returns how many
/// paths were queued.
fn accept_events(
    batch: Vec<WatchEvent>,
    pending: &RwLock<HashSet<PathBuf>>,
    max_event_id: &mut u64,
) -> usize {
    let mut queued = 0;
    for event in batch {
        *max_event_id = (*max_event_id).max(event.event_id);

        let flags = event.flags;
        if flags.contains(EventFlags::HISTORY_DONE) {
            tracing::info!("event history replay complete");
            continue;
        }
        if flags.contains(EventFlags::ROOT_CHANGED) {
            tracing::info!(path = %event.path.display(), "watched root changed");
            continue;
        }
        if flags.contains(EventFlags::MUST_SCAN_SUBDIRS) {
            tracing::info!(path = %event.path.display(), "kernel coalesced events, subtree rescan advised");
            continue;
        }
        if flags.is_dropped() {
            tracing::error!("kernel reported dropped events, index may need a full rebuild");
            continue;
        }
        if flags.is_structural() {
            if let Ok(mut set) = pending.write() {
                set.insert(event.path);
                queued += 1;
            }
        }
    }
    queued
}

/// Drains the pending set atomically and hands the batch to the DB
/// worker together with the current max event id.
fn flush_pending(pending: &RwLock<HashSet<PathBuf>>, db_tx: &Sender<DbBatch>, max_event_id: u64) {
    let drained: Vec<PathBuf> = match pending.write() {
        Ok(mut set) => set.drain().collect(),
        Err(_) => return,
    };
    if drained.is_empty() {
        return;
    }
    tracing::debug!(paths = drained.len(), "flushing change batch");
    let _ = db_tx.send((drained, max_event_id));
}

// ---------------------------------------------------------------------------
// DB worker thread
// ---------------------------------------------------------------------------

fn run_db_worker(
    db_rx: Receiver<DbBatch>,
    store: Store,
    policy: Arc<ExclusionPolicy>,
    factory: EntryFactory,
) {
    while let Ok((paths, max_event_id)) = db_rx.recv() {
        let mut upserts = Vec::new();
        let mut deletes = Vec::new();

        for path in paths {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            match fs::symlink_metadata(&path) {
                Ok(metadata) if !metadata.file_type().is_symlink() => {
                    if policy.excludes(&path, &name, metadata.is_dir()) {
                        deletes.push(path.to_string_lossy().into_owned());
                    } else if let Ok(entry) = factory.entry_from_metadata(&path, &metadata) {
                        upserts.push(entry);
                    }
                }
                // Gone from disk (or became a symlink): drop the row.
                _ => deletes.push(path.to_string_lossy().into_owned()),
            }
        }

        if let Err(error) = store.upsert_entries(&upserts) {
            tracing::error!(count = upserts.len(), %error, "change upsert failed");
        }
        if let Err(error) = store.delete_paths(&deletes) {
            tracing::error!(count = deletes.len(), %error, "change delete failed");
        }
        if max_event_id > 0 {
            if let Err(error) = store.checkpoint_event_id(max_event_id) {
                tracing::error!(event_id = max_event_id, %error, "event-id checkpoint failed");
            }
        }
        tracing::debug!(
            upserts = upserts.len(),
            deletes = deletes.len(),
            event_id = max_event_id,
            "change batch committed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use std::fs::File;
    use std::io::Write;
    use std::path::Path;

    struct FakeStream;
    impl EventStream for FakeStream {
        fn invalidate(&mut self) {}
    }

    /// A stream factory that parks the batch sender where the test can
    /// reach it.
    fn scripted_factory(
        slot: Arc<Mutex<Option<crate::watcher::EventBatchSender>>>,
    ) -> StreamFactory {
        Arc::new(
            move |_roots: &[std::path::PathBuf],
                  _since: Option<u64>,
                  tx: crate::watcher::EventBatchSender| {
                *slot.lock().unwrap() = Some(tx);
                Ok(Box::new(FakeStream) as Box<dyn EventStream>)
            },
        )
    }

    fn reject_probe() -> CursorProbeFn {
        Arc::new(|_: &[std::path::PathBuf], _: u64| false)
    }

    fn monitor_fixture(
        dir: &tempfile::TempDir,
        threshold: usize,
        delay: Duration,
    ) -> (
        ChangeMonitor,
        Arc<Mutex<Option<crate::watcher::EventBatchSender>>>,
        Store,
    ) {
        let store = Store::open(&dir.path().join("index.db")).expect("open store");
        let slot = Arc::new(Mutex::new(None));
        let mut config = MonitorConfig::new(vec![dir.path().to_path_buf()]);
        config.batch_threshold = threshold;
        config.flush_delay = delay;
        let monitor = ChangeMonitor::with_backend(
            store.clone(),
            Arc::new(ExclusionPolicy::new()),
            EntryFactory::new(Clock::system()),
            config,
            scripted_factory(slot.clone()),
            reject_probe(),
        );
        (monitor, slot, store)
    }

    fn created(path: &Path, event_id: u64) -> WatchEvent {
        WatchEvent {
            path: path.to_path_buf(),
            flags: EventFlags::ITEM_CREATED | EventFlags::ITEM_IS_FILE,
            event_id,
        }
    }

    fn removed(path: &Path, event_id: u64) -> WatchEvent {
        WatchEvent {
            path: path.to_path_buf(),
            flags: EventFlags::ITEM_REMOVED | EventFlags::ITEM_IS_FILE,
            event_id,
        }
    }

    fn wait_until(mut check: impl FnMut() -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn start_is_idempotent_and_stop_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (monitor, _slot, _store) = monitor_fixture(&dir, 50, Duration::from_secs(2));

        assert_eq!(monitor.state(), MonitorState::Stopped);
        monitor.start_monitoring_with_recovery().expect("start");
        assert_eq!(monitor.state(), MonitorState::Active);
        monitor.start_monitoring_with_recovery().expect("restart");
        assert_eq!(monitor.state(), MonitorState::Active);

        monitor.stop_monitoring();
        assert_eq!(monitor.state(), MonitorState::Stopped);
        assert_eq!(monitor.status().pending_updates, 0);
    }

    #[test]
    fn created_file_is_upserted_after_the_flush_delay() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (monitor, slot, store) = monitor_fixture(&dir, 50, Duration::from_millis(50));
        monitor.start_monitoring_with_recovery().expect("start");

        let path = dir.path().join("notes.md");
        let mut file = File::create(&path).expect("create");
        file.write_all(b"hello").expect("write");

        let tx = slot.lock().unwrap().clone().expect("stream sender");
        tx.send(vec![created(&path, 7)]).expect("send event");

        assert!(
            wait_until(
                || store.entry_count().unwrap_or(0) == 1,
                Duration::from_secs(5)
            ),
            "entry should appear within the flush delay"
        );
        assert!(
            wait_until(
                || store.last_event_id().ok().flatten() == Some(7),
                Duration::from_secs(5)
            ),
            "event id should be checkpointed after dispatch"
        );
        monitor.stop_monitoring();
    }

    #[test]
    fn removed_file_is_deleted_from_the_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (monitor, slot, store) = monitor_fixture(&dir, 50, Duration::from_millis(50));
        monitor.start_monitoring_with_recovery().expect("start");

        let path = dir.path().join("notes.md");
        File::create(&path)
            .and_then(|mut f| f.write_all(b"x"))
            .expect("create");

        let tx = slot.lock().unwrap().clone().expect("stream sender");
        tx.send(vec![created(&path, 1)]).expect("send create");
        assert!(wait_until(
            || store.entry_count().unwrap_or(0) == 1,
            Duration::from_secs(5)
        ));

        fs::remove_file(&path).expect("unlink");
        tx.send(vec![removed(&path, 2)]).expect("send remove");
        assert!(
            wait_until(
                || store.entry_count().unwrap_or(-1) == 0,
                Duration::from_secs(5)
            ),
            "entry should be deleted after the remove event"
        );
        monitor.stop_monitoring();
    }

    #[test]
    fn reaching_the_threshold_flushes_immediately() {
        let dir = tempfile::tempdir().expect("tempdir");
        // Long delay: only the threshold can trigger the flush.
        let (monitor, slot, store) = monitor_fixture(&dir, 2, Duration::from_secs(600));
        monitor.start_monitoring_with_recovery().expect("start");

        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        for path in [&a, &b] {
            File::create(path)
                .and_then(|mut f| f.write_all(b"x"))
                .expect("create");
        }

        let tx = slot.lock().unwrap().clone().expect("stream sender");
        tx.send(vec![created(&a, 1), created(&b, 2)]).expect("send");

        assert!(
            wait_until(
                || store.entry_count().unwrap_or(0) == 2,
                Duration::from_secs(5)
            ),
            "threshold-size batch should flush without waiting for the timer"
        );
        monitor.stop_monitoring();
    }

    #[test]
    fn non_structural_events_are_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (monitor, slot, store) = monitor_fixture(&dir, 50, Duration::from_millis(50));
        monitor.start_monitoring_with_recovery().expect("start");

        let path = dir.path().join("quiet.txt");
        File::create(&path)
            .and_then(|mut f| f.write_all(b"x"))
            .expect("create");

        let tx = slot.lock().unwrap().clone().expect("stream sender");
        tx.send(vec![
            WatchEvent {
                path: path.clone(),
                flags: EventFlags::ITEM_MODIFIED | EventFlags::ITEM_IS_FILE,
                event_id: 3,
            },
            WatchEvent {
                path: path.clone(),
                flags: EventFlags::HISTORY_DONE,
                event_id: 4,
            },
        ])
        .expect("send");

        thread::sleep(Duration::from_millis(300));
        assert_eq!(
            store.entry_count().expect("count"),
            0,
            "content-only changes must not create rows"
        );
        monitor.stop_monitoring();
    }
}
