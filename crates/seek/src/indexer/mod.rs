//! Indexing orchestration: the smart decision, the bulk full crawl,
//! and the resumable changed-subtree refresh.
//!
//! Full indexing runs inside the pool's bulk mode (one long
//! transaction with durability pragmas relaxed) and finishes with
//! VACUUM + ANALYZE. Batch failures inside a worker are logged and
//! dropped; only transaction-level failures abort the run.

pub mod scan;
pub mod work_queue;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::error::{Result, SeekError};
use crate::policy::ExclusionPolicy;
use crate::storage::entry::{is_bundle, EntryFactory};
use crate::storage::Store;
use crate::types::Entry;

pub use scan::{ScanOptions, Scanner};
pub use work_queue::WorkQueue;

// ---------------------------------------------------------------------------
// Configuration and progress
// ---------------------------------------------------------------------------

/// Concurrency and batching knobs.
#[derive(Debug, Clone, Copy)]
pub struct IndexerConfig {
    /// Workers for the full crawl.
    pub full_workers: usize,
    /// Workers for change detection during a refresh.
    pub change_workers: usize,
    /// Workers for subtree rebuilds during a refresh.
    pub rebuild_workers: usize,
    /// Entries per batched write.
    pub batch_size: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            full_workers: 8,
            change_workers: 6,
            rebuild_workers: 4,
            batch_size: 50_000,
        }
    }
}

/// Fire-and-forget progress callback: `(fraction, processed, total, message)`.
/// Must be safe to call from any worker thread.
pub type ProgressCallback = Arc<dyn Fn(f64, u64, u64, Option<&str>) + Send + Sync>;

/// A progress callback that discards every update.
pub fn noop_progress() -> ProgressCallback {
    Arc::new(|_: f64, _: u64, _: u64, _: Option<&str>| {})
}

/// Counters accumulated across all workers of one indexing run.
#[derive(Debug, Default)]
pub struct IndexingStatistics {
    pub total_processed: AtomicU64,
    pub excluded_path_count: AtomicU64,
    pub symlink_count: AtomicU64,
    pub rebuilt_count: AtomicU64,
    pub dropped_batches: AtomicU64,
    progress_bucket: AtomicU64,
}

impl IndexingStatistics {
    fn log_summary(&self, phase: &str, elapsed: Duration) {
        let processed = self.total_processed.load(Ordering::Relaxed);
        let rate = if elapsed.as_secs_f64() > 0.0 {
            processed as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        tracing::info!(
            phase,
            processed,
            excluded = self.excluded_path_count.load(Ordering::Relaxed),
            symlinks = self.symlink_count.load(Ordering::Relaxed),
            rebuilt = self.rebuilt_count.load(Ordering::Relaxed),
            dropped_batches = self.dropped_batches.load(Ordering::Relaxed),
            elapsed_ms = elapsed.as_millis() as u64,
            rate_per_sec = rate as u64,
            "indexing pass finished"
        );
    }
}

/// Answers whether a persisted event-id cursor can still seed a live
/// event stream for the given roots. Implemented by the change monitor;
/// the indexer only consumes the verdict.
pub trait EventCursorProbe: Send + Sync {
    fn is_event_id_valid(&self, event_id: u64, roots: &[PathBuf]) -> bool;
}

/// A probe that rejects every cursor, forcing the non-live paths.
#[derive(Debug, Default, Clone, Copy)]
pub struct RejectAllCursors;

impl EventCursorProbe for RejectAllCursors {
    fn is_event_id_valid(&self, _event_id: u64, _roots: &[PathBuf]) -> bool {
        false
    }
}

/// What the smart-indexing decision ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexingOutcome {
    /// The stored cursor is live; incremental updates cover the gap.
    AlreadyLive,
    /// Changed subtrees were rebuilt in place.
    Refreshed { rebuilt_subtrees: u64, total_files: u64 },
    /// The store was recreated and fully rebuilt.
    FullyIndexed { total_files: u64 },
}

// ---------------------------------------------------------------------------
// Indexer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Indexer {
    store: Store,
    scanner: Scanner,
    config: IndexerConfig,
    clock: Clock,
    cancel: Arc<AtomicBool>,
}

impl Indexer {
    pub fn new(
        store: Store,
        policy: Arc<ExclusionPolicy>,
        config: IndexerConfig,
        clock: Clock,
    ) -> Self {
        let scanner = Scanner::new(
            policy,
            EntryFactory::new(clock.clone()),
            ScanOptions::default(),
        );
        Self {
            store,
            scanner,
            config,
            clock,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag the caller sets to stop an indexing run. Cancellation takes
    /// effect between roots and between directory batches, never inside
    /// the bulk transaction's commit.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Decides between doing nothing, refreshing changed subtrees, and
    /// a full rebuild.
    pub fn perform_smart_indexing(
        &self,
        roots: &[PathBuf],
        probe: &dyn EventCursorProbe,
        progress: &ProgressCallback,
    ) -> Result<IndexingOutcome> {
        let metadata = self.store.metadata()?;

        if metadata.is_indexed {
            if let Some(event_id) = metadata.last_event_id {
                if probe.is_event_id_valid(event_id, roots) {
                    let total = metadata.total_files_indexed.max(0) as u64;
                    tracing::info!(event_id, "event cursor accepted, index is current");
                    progress(1.0, total, total, Some("index is current"));
                    return Ok(IndexingOutcome::AlreadyLive);
                }
                tracing::info!(event_id, "event cursor rejected");
            }

            if let Some(since) = metadata.last_indexed_date {
                if same_roots(&metadata.indexed_paths, roots) {
                    match self.perform_refresh(roots, since, progress) {
                        Ok((rebuilt_subtrees, total_files)) => {
                            return Ok(IndexingOutcome::Refreshed {
                                rebuilt_subtrees,
                                total_files,
                            });
                        }
                        Err(error) => {
                            tracing::warn!(%error, "refresh failed, falling back to full indexing");
                        }
                    }
                }
            }
        }

        let total_files = self.perform_full_indexing(roots, progress)?;
        Ok(IndexingOutcome::FullyIndexed { total_files })
    }

    /// Recreates the store and crawls every root with the full worker
    /// pool inside bulk mode.
    pub fn perform_full_indexing(
        &self,
        roots: &[PathBuf],
        progress: &ProgressCallback,
    ) -> Result<u64> {
        let started = Instant::now();
        let stats = IndexingStatistics::default();
        self.cancel.store(false, Ordering::Relaxed);
        progress(0.0, 0, 0, Some("starting full index"));

        let existing_roots = existing(roots)?;
        let prior_metadata = self.store.metadata()?;
        let prior_total = prior_metadata.total_files_indexed.max(0) as u64;

        if self.store.entry_count()? > 0 || prior_metadata.is_indexed {
            self.store.recreate()?;
        }

        self.store.pool().begin_bulk().map_err(|error| {
            SeekError::IndexingFailed(format!("bulk begin failed: {error}"))
        })?;

        for root in &existing_roots {
            if self.cancel.load(Ordering::Relaxed) {
                let _ = self.store.pool().abort_bulk();
                let _ = self.store.mark_not_indexed();
                return Err(SeekError::IndexingFailed("indexing cancelled".to_string()));
            }
            self.index_root(root, &stats, prior_total, progress);
        }

        if self.cancel.load(Ordering::Relaxed) {
            let _ = self.store.pool().abort_bulk();
            let _ = self.store.mark_not_indexed();
            return Err(SeekError::IndexingFailed("indexing cancelled".to_string()));
        }

        if let Err(error) = self.store.pool().commit_bulk() {
            let _ = self.store.pool().abort_bulk();
            let _ = self.store.mark_not_indexed();
            return Err(SeekError::IndexingFailed(format!(
                "bulk commit failed: {error}"
            )));
        }

        let total_files = self.store.entry_count()?;
        self.store
            .mark_indexed(&existing_roots, total_files, self.clock.now())?;

        stats.log_summary("full", started.elapsed());
        let processed = stats.total_processed.load(Ordering::Relaxed);
        progress(1.0, processed, processed, Some("indexing complete"));
        Ok(total_files as u64)
    }

    fn index_root(
        &self,
        root: &Path,
        stats: &IndexingStatistics,
        prior_total: u64,
        progress: &ProgressCallback,
    ) {
        // Root-level files first: cheap, and gives early results.
        match self.scanner.scan_root_level_files(root) {
            Ok(files) => {
                stats
                    .total_processed
                    .fetch_add(files.len() as u64, Ordering::Relaxed);
                self.write_batches(&files, stats);
            }
            Err(error) => {
                tracing::warn!(root = %root.display(), %error, "root-level scan failed");
            }
        }

        let queue: WorkQueue<PathBuf> = WorkQueue::new();
        match self.scanner.top_level_directories(root) {
            Ok(directories) => queue.enqueue_many(directories),
            Err(error) => {
                tracing::warn!(root = %root.display(), %error, "top-level listing failed");
            }
        }

        thread::scope(|scope| {
            for _ in 0..self.config.full_workers.max(1) {
                scope.spawn(|| {
                    queue.add_worker();
                    while let Some(directory) = queue.dequeue_for_worker() {
                        if self.cancel.load(Ordering::Relaxed) {
                            queue.worker_finished_item();
                            break;
                        }
                        let entries = self.process_directory(&directory, &queue, stats);
                        self.write_batches(&entries, stats);
                        self.report_crawl_progress(stats, prior_total, progress);
                        queue.worker_finished_item();
                    }
                    queue.remove_worker();
                });
            }
        });
    }

    /// One popped directory: emit the directory itself, then classify
    /// children. Bundles and files become entries, plain directories
    /// go back on the queue, symlinks and excluded paths are counted.
    fn process_directory(
        &self,
        directory: &Path,
        queue: &WorkQueue<PathBuf>,
        stats: &IndexingStatistics,
    ) -> Vec<Entry> {
        let factory = self.scanner.factory();
        let mut entries = Vec::new();
        if let Ok(entry) = factory.entry_for_path(directory) {
            entries.push(entry);
        }

        let reader = match fs::read_dir(directory) {
            Ok(reader) => reader,
            Err(error) => {
                tracing::debug!(path = %directory.display(), %error, "unreadable directory, treated as empty");
                stats
                    .total_processed
                    .fetch_add(entries.len() as u64, Ordering::Relaxed);
                return entries;
            }
        };

        for child in reader.flatten() {
            let path = child.path();
            let Ok(metadata) = path.symlink_metadata() else {
                continue;
            };
            if metadata.file_type().is_symlink() {
                stats.symlink_count.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            let name = child.file_name();
            let name = name.to_string_lossy();
            let is_dir = metadata.is_dir();
            if self.scanner.policy().excludes(&path, &name, is_dir) {
                stats.excluded_path_count.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            if is_dir && !is_bundle(&path, true) {
                queue.enqueue(path);
                continue;
            }
            if let Ok(entry) = factory.entry_from_metadata(&path, &metadata) {
                entries.push(entry);
            }
        }

        stats
            .total_processed
            .fetch_add(entries.len() as u64, Ordering::Relaxed);
        entries
    }

    /// Writes entries in `batch_size` chunks. A failed chunk is logged
    /// and dropped; the crawl continues.
    fn write_batches(&self, entries: &[Entry], stats: &IndexingStatistics) {
        for chunk in entries.chunks(self.config.batch_size.max(1)) {
            if let Err(error) = self.store.upsert_entries(chunk) {
                stats.dropped_batches.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    batch_len = chunk.len(),
                    %error,
                    "batch insert failed, batch dropped"
                );
            }
        }
    }

    fn report_crawl_progress(
        &self,
        stats: &IndexingStatistics,
        prior_total: u64,
        progress: &ProgressCallback,
    ) {
        const REPORT_EVERY: u64 = 10_000;
        let processed = stats.total_processed.load(Ordering::Relaxed);
        let bucket = processed / REPORT_EVERY;
        if bucket == 0 || stats.progress_bucket.fetch_max(bucket, Ordering::Relaxed) >= bucket {
            return;
        }
        // A previous run's cardinality is the best denominator we have
        // mid-crawl; without one the fraction stays indeterminate.
        let fraction = if prior_total > 0 {
            (processed as f64 / prior_total as f64).min(0.95)
        } else {
            0.5
        };
        progress(fraction, processed, prior_total, None);
    }

    // -----------------------------------------------------------------
    // Refresh (resumable) path
    // -----------------------------------------------------------------

    /// Rebuilds only the subtrees whose directory mtimes moved past the
    /// last successful indexing time.
    fn perform_refresh(
        &self,
        roots: &[PathBuf],
        since: f64,
        progress: &ProgressCallback,
    ) -> Result<(u64, u64)> {
        let started = Instant::now();
        let stats = IndexingStatistics::default();
        progress(0.0, 0, 0, Some("refreshing changed subtrees"));

        let existing_roots = existing(roots)?;
        for root in &existing_roots {
            self.refresh_root_level(root, &stats)?;

            let changed = self.detect_changed_subtrees(root, since);
            tracing::info!(
                root = %root.display(),
                changed = changed.len(),
                "change detection finished"
            );
            self.rebuild_subtrees(changed, &stats);
        }

        let total_files = self.store.entry_count()?;
        self.store.touch_indexed(total_files, self.clock.now())?;

        stats.log_summary("refresh", started.elapsed());
        let rebuilt = stats.rebuilt_count.load(Ordering::Relaxed);
        let processed = stats.total_processed.load(Ordering::Relaxed);
        progress(1.0, processed, processed, Some("refresh complete"));
        Ok((rebuilt, total_files as u64))
    }

    /// Re-scans root-level files and reconciles deletions among them.
    fn refresh_root_level(&self, root: &Path, stats: &IndexingStatistics) -> Result<()> {
        let files = self.scanner.scan_root_level_files(root)?;
        stats
            .total_processed
            .fetch_add(files.len() as u64, Ordering::Relaxed);

        let vanished = self
            .store
            .direct_child_paths(&root.to_string_lossy())?
            .into_iter()
            .filter(|path| fs::symlink_metadata(Path::new(path)).is_err())
            .collect::<Vec<_>>();
        for path in &vanished {
            // Subtree delete so a removed top-level directory takes its
            // descendants' rows with it.
            self.store.delete_subtree(path)?;
        }
        self.write_batches(&files, stats);
        Ok(())
    }

    fn detect_changed_subtrees(&self, root: &Path, since: f64) -> Vec<PathBuf> {
        let queue: WorkQueue<PathBuf> = WorkQueue::new();
        match self.scanner.top_level_directories(root) {
            Ok(directories) => queue.enqueue_many(directories),
            Err(error) => {
                tracing::warn!(root = %root.display(), %error, "top-level listing failed");
            }
        }

        let changed: Mutex<Vec<PathBuf>> = Mutex::new(Vec::new());
        thread::scope(|scope| {
            for _ in 0..self.config.change_workers.max(1) {
                scope.spawn(|| {
                    queue.add_worker();
                    while let Some(directory) = queue.dequeue_for_worker() {
                        let roots = self.scanner.changed_subtree_roots(&directory, since);
                        if !roots.is_empty() {
                            if let Ok(mut guard) = changed.lock() {
                                guard.extend(roots);
                            }
                        }
                        queue.worker_finished_item();
                    }
                    queue.remove_worker();
                });
            }
        });
        changed.into_inner().unwrap_or_default()
    }

    fn rebuild_subtrees(&self, subtrees: Vec<PathBuf>, stats: &IndexingStatistics) {
        let queue: WorkQueue<PathBuf> = WorkQueue::new();
        queue.enqueue_many(subtrees);

        thread::scope(|scope| {
            for _ in 0..self.config.rebuild_workers.max(1) {
                scope.spawn(|| {
                    queue.add_worker();
                    while let Some(subtree) = queue.dequeue_for_worker() {
                        if let Err(error) =
                            self.store.delete_subtree(&subtree.to_string_lossy())
                        {
                            tracing::error!(path = %subtree.display(), %error, "subtree delete failed");
                            queue.worker_finished_item();
                            continue;
                        }
                        let entries = self.scanner.scan_recursive(&subtree);
                        stats
                            .total_processed
                            .fetch_add(entries.len() as u64, Ordering::Relaxed);
                        self.write_batches(&entries, stats);
                        stats.rebuilt_count.fetch_add(1, Ordering::Relaxed);
                        queue.worker_finished_item();
                    }
                    queue.remove_worker();
                });
            }
        });
    }
}

/// Keeps only roots that exist, erroring when none do.
fn existing(roots: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut present = Vec::new();
    for root in roots {
        if root.exists() {
            present.push(root.clone());
        } else {
            tracing::warn!(root = %root.display(), "root does not exist, skipped");
        }
    }
    if present.is_empty() {
        return Err(SeekError::IndexingPathNotFound(
            roots.first().cloned().unwrap_or_default(),
        ));
    }
    Ok(present)
}

fn same_roots(stored: &[PathBuf], requested: &[PathBuf]) -> bool {
    let mut stored: Vec<_> = stored.to_vec();
    let mut requested: Vec<_> = requested.to_vec();
    stored.sort();
    requested.sort();
    stored == requested
}
