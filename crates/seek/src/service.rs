//! Application root: owns every service and wires them in dependency
//! order (store → monitor → indexer → search).
//!
//! The GUI shell talks to [`Seek`] exclusively; nothing else in the
//! crate is process-global. `SeekConfig.store_path` and `clock` exist
//! as test seams.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::error::{Result, SeekError};
use crate::indexer::{noop_progress, Indexer, IndexerConfig, IndexingOutcome, ProgressCallback};
use crate::monitor::{ChangeMonitor, MonitorConfig};
use crate::policy::ExclusionPolicy;
use crate::search::{SearchService, DEFAULT_SEARCH_LIMIT};
use crate::storage::entry::EntryFactory;
use crate::storage::Store;
use crate::types::{IndexingStatus, MonitoringStatus, SearchResult, SearchStats};

/// Database file name under the application-support directory.
const STORE_FILE_NAME: &str = "file_indexing_table.db";

#[derive(Debug, Clone)]
pub struct SeekConfig {
    /// Explicit database path. `None` resolves to
    /// `<app_support>/Seek/file_indexing_table.db`.
    pub store_path: Option<PathBuf>,
    /// Roots to index and monitor.
    pub roots: Vec<PathBuf>,
    pub indexer: IndexerConfig,
    /// Pending-set size that flushes a monitor batch immediately.
    pub monitor_batch_threshold: usize,
    /// One-shot timer delay before a partial monitor batch flushes.
    pub monitor_flush_delay: Duration,
    pub skip_hidden: bool,
    pub skip_dev_extensions: bool,
    pub clock: Clock,
}

impl Default for SeekConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            roots: vec![PathBuf::from("/")],
            indexer: IndexerConfig::default(),
            monitor_batch_threshold: 50,
            monitor_flush_delay: Duration::from_secs(2),
            skip_hidden: false,
            skip_dev_extensions: false,
            clock: Clock::system(),
        }
    }
}

/// The assembled application services.
pub struct Seek {
    store: Store,
    indexer: Indexer,
    monitor: Arc<ChangeMonitor>,
    search: SearchService,
    roots: Vec<PathBuf>,
}

impl Seek {
    /// Opens the store and constructs the services in dependency order.
    pub fn open(config: SeekConfig) -> Result<Self> {
        let store_path = match config.store_path.clone() {
            Some(path) => path,
            None => default_store_path()?,
        };
        let store = Store::open(&store_path)?;

        let policy = Arc::new(
            ExclusionPolicy::new()
                .with_skip_hidden(config.skip_hidden)
                .with_skip_dev_extensions(config.skip_dev_extensions),
        );

        let mut monitor_config = MonitorConfig::new(config.roots.clone());
        monitor_config.batch_threshold = config.monitor_batch_threshold;
        monitor_config.flush_delay = config.monitor_flush_delay;
        let monitor = Arc::new(ChangeMonitor::new(
            store.clone(),
            policy.clone(),
            EntryFactory::new(config.clock.clone()),
            monitor_config,
        ));

        let indexer = Indexer::new(store.clone(), policy, config.indexer, config.clock.clone());
        let search = SearchService::new(store.clone());

        tracing::info!(store = %store_path.display(), roots = config.roots.len(), "seek services ready");
        Ok(Self {
            store,
            indexer,
            monitor,
            search,
            roots: config.roots,
        })
    }

    // -----------------------------------------------------------------
    // Search surface
    // -----------------------------------------------------------------

    pub fn search(&self, query: &str, limit: Option<usize>) -> Result<SearchResult> {
        self.search
            .search(query, limit.unwrap_or(DEFAULT_SEARCH_LIMIT))
    }

    pub fn search_service(&self) -> &SearchService {
        &self.search
    }

    // -----------------------------------------------------------------
    // Indexing surface
    // -----------------------------------------------------------------

    pub fn is_indexed(&self) -> Result<bool> {
        Ok(self.store.metadata()?.is_indexed)
    }

    pub fn indexing_status(&self) -> Result<IndexingStatus> {
        self.store.indexing_status()
    }

    /// Smart indexing over `roots` (or the configured roots), with the
    /// monitor supplying the event-cursor validity check.
    pub fn perform_smart_indexing(
        &self,
        roots: Option<&[PathBuf]>,
        progress: Option<ProgressCallback>,
    ) -> Result<IndexingOutcome> {
        let roots = roots.unwrap_or(&self.roots).to_vec();
        let progress = progress.unwrap_or_else(noop_progress);
        self.indexer
            .perform_smart_indexing(&roots, self.monitor.as_ref(), &progress)
    }

    pub fn perform_full_indexing(
        &self,
        roots: Option<&[PathBuf]>,
        progress: Option<ProgressCallback>,
    ) -> Result<u64> {
        let roots = roots.unwrap_or(&self.roots).to_vec();
        let progress = progress.unwrap_or_else(noop_progress);
        self.indexer.perform_full_indexing(&roots, &progress)
    }

    // -----------------------------------------------------------------
    // Monitoring surface
    // -----------------------------------------------------------------

    pub fn start_monitoring_with_recovery(&self) -> Result<()> {
        self.monitor.start_monitoring_with_recovery()
    }

    pub fn stop_monitoring(&self) {
        self.monitor.stop_monitoring()
    }

    pub fn monitoring_status(&self) -> MonitoringStatus {
        self.monitor.status()
    }

    // -----------------------------------------------------------------
    // Stats surface
    // -----------------------------------------------------------------

    pub fn file_count(&self) -> Result<i64> {
        self.store.entry_count()
    }

    pub fn search_stats(&self) -> Result<SearchStats> {
        self.store.search_stats()
    }

    pub fn store(&self) -> &Store {
        &self.store
    }
}

fn default_store_path() -> Result<PathBuf> {
    let base = dirs::data_dir().ok_or_else(|| {
        SeekError::StoreConnectionFailed("no application-support directory".to_string())
    })?;
    Ok(base.join("Seek").join(STORE_FILE_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use std::io::Write;

    fn seek_over(dir: &tempfile::TempDir, root: PathBuf) -> Seek {
        Seek::open(SeekConfig {
            store_path: Some(dir.path().join("store/index.db")),
            roots: vec![root],
            ..SeekConfig::default()
        })
        .expect("open seek")
    }

    #[test]
    fn open_index_search_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("tree");
        fs::create_dir_all(root.join("docs")).expect("mkdirs");
        File::create(root.join("docs/report.txt"))
            .and_then(|mut f| f.write_all(b"content"))
            .expect("write");

        let seek = seek_over(&dir, root);
        assert!(!seek.is_indexed().expect("is_indexed"));

        let outcome = seek
            .perform_smart_indexing(None, None)
            .expect("smart index");
        assert!(matches!(outcome, IndexingOutcome::FullyIndexed { .. }));
        assert!(seek.is_indexed().expect("is_indexed"));
        assert_eq!(seek.file_count().expect("count"), 2); // docs + report.txt

        let result = seek.search("report", None).expect("search");
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0].name, "report.txt");

        let stats = seek.search_stats().expect("stats");
        assert_eq!(stats.total_files, 2);
        assert!(stats.index_size_bytes > 0);
    }

    #[test]
    fn monitoring_status_reflects_lifecycle() {
        let dir = tempfile::tempdir().expect("tempdir");
        let root = dir.path().join("tree");
        fs::create_dir(&root).expect("mkdir");

        let seek = seek_over(&dir, root.clone());
        let status = seek.monitoring_status();
        assert_eq!(status.state, crate::types::MonitorState::Stopped);
        assert_eq!(status.roots, vec![root]);
        assert_eq!(status.pending_updates, 0);
    }
}
