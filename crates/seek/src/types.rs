//! Core data types shared across the indexer, monitor, and search layers.
//!
//! These are the internal representations. The GUI shell converts them
//! to its own payload types for display.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One indexed filesystem item: a file, a directory, or a bundle
/// (an opaque package directory indexed as a single file-like item).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    /// Basename, case-preserving. Never empty.
    pub name: String,
    /// Absolute path. Unique within the store.
    pub full_path: String,
    /// True for directories, including bundles.
    pub is_directory: bool,
    /// Lowercased extension. `None` for ordinary directories and for
    /// files without an extension; bundles keep their suffix (`app`, …).
    pub file_extension: Option<String>,
    /// Size in bytes. `None` for ordinary directories; bundles carry
    /// the recursive sum of their non-directory descendants.
    pub size: Option<i64>,
    /// Content modification time, seconds since the Unix epoch.
    pub date_modified: f64,
}

/// Search results plus the wall-clock time the search took.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub entries: Vec<Entry>,
    pub search_time_seconds: f64,
}

/// A snapshot of the store's indexing metadata row.
#[derive(Debug, Clone, Serialize)]
pub struct IndexingStatus {
    pub is_indexed: bool,
    pub last_indexed_date: Option<f64>,
    pub indexed_paths: Vec<PathBuf>,
    pub file_count: i64,
}

/// Aggregate index statistics for the UI status line.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SearchStats {
    pub total_files: i64,
    pub index_size_bytes: u64,
}

/// Lifecycle state of the change monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorState {
    Stopped,
    Starting,
    Active,
    Stopping,
}

impl MonitorState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Active => "active",
            Self::Stopping => "stopping",
        }
    }
}

/// A snapshot of the change monitor's state for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct MonitoringStatus {
    pub state: MonitorState,
    pub roots: Vec<PathBuf>,
    pub pending_updates: usize,
    pub last_event_id: Option<u64>,
}
