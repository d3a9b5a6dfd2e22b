//! Entry store: schema ownership, entry CRUD, and the single-row
//! indexing metadata table.
//!
//! Mutation flows through two paths only: the indexer (bulk loads,
//! truncation, metadata) and the change monitor (upserts, deletes,
//! event-id checkpoints). Everything else reads.

pub mod entry;
pub mod pool;
pub mod pragmas;
pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, SeekError};
use crate::types::{Entry, IndexingStatus, SearchStats};

pub use entry::{is_bundle, EntryFactory};
pub use pool::ConnectionPool;

/// The indexing metadata row (always `id = 1`).
#[derive(Debug, Clone, Default)]
pub struct IndexingMetadata {
    pub is_indexed: bool,
    pub last_indexed_date: Option<f64>,
    pub indexed_paths: Vec<PathBuf>,
    pub total_files_indexed: i64,
    pub indexing_version: i64,
    pub last_event_id: Option<u64>,
}

/// Facade over the connection pool for every store operation the
/// indexer, monitor, and search service need.
#[derive(Debug, Clone)]
pub struct Store {
    pool: Arc<ConnectionPool>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let pool = ConnectionPool::open(path, pool::DEFAULT_READER_COUNT)?;
        Ok(Self { pool: Arc::new(pool) })
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    // -----------------------------------------------------------------
    // Entries
    // -----------------------------------------------------------------

    /// Upserts a batch of entries (`INSERT OR REPLACE` keyed on
    /// `full_path`). Outside bulk mode the batch runs in its own
    /// transaction; inside bulk mode it joins the indexer's long one.
    pub fn upsert_entries(&self, entries: &[Entry]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }
        let own_transaction = !self.pool.bulk_active();
        self.pool.write(|conn| {
            if own_transaction {
                let tx = conn
                    .unchecked_transaction()
                    .map_err(|e| SeekError::StoreQueryFailed(e.to_string()))?;
                insert_all(&tx, entries)?;
                tx.commit()
                    .map_err(|e| SeekError::StoreQueryFailed(e.to_string()))?;
            } else {
                insert_all(conn, entries)?;
            }
            Ok(entries.len())
        })
    }

    /// Deletes entries by exact `full_path`.
    pub fn delete_paths(&self, paths: &[String]) -> Result<usize> {
        if paths.is_empty() {
            return Ok(0);
        }
        self.pool.write(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| SeekError::StoreQueryFailed(e.to_string()))?;
            let mut deleted = 0usize;
            {
                let mut stmt = tx
                    .prepare_cached("DELETE FROM file_entries WHERE full_path = ?1")
                    .map_err(|e| SeekError::StoreQueryFailed(e.to_string()))?;
                for path in paths {
                    deleted += stmt
                        .execute(params![path])
                        .map_err(|e| SeekError::StoreQueryFailed(e.to_string()))?;
                }
            }
            tx.commit()
                .map_err(|e| SeekError::StoreQueryFailed(e.to_string()))?;
            Ok(deleted)
        })
    }

    /// Deletes an entry subtree: the path itself plus everything below it.
    pub fn delete_subtree(&self, root: &str) -> Result<usize> {
        let prefix = format!("{}/%", escape_like(root.trim_end_matches('/')));
        self.pool.write(|conn| {
            conn.execute(
                "DELETE FROM file_entries WHERE full_path = ?1 OR full_path LIKE ?2 ESCAPE '\\'",
                params![root, prefix],
            )
            .map_err(|e| SeekError::StoreQueryFailed(e.to_string()))
        })
    }

    /// Removes every entry. FTS rows follow through the delete trigger.
    pub fn truncate_entries(&self) -> Result<()> {
        self.pool.write(|conn| {
            conn.execute("DELETE FROM file_entries", [])
                .map_err(|e| SeekError::StoreQueryFailed(e.to_string()))?;
            Ok(())
        })
    }

    /// Paths of entries directly under `root` (one level, no deeper).
    /// Used by the refresh pass to reconcile root-level deletions.
    pub fn direct_child_paths(&self, root: &str) -> Result<Vec<String>> {
        let base = escape_like(root.trim_end_matches('/'));
        let one_level = format!("{base}/%");
        let deeper = format!("{base}/%/%");
        self.pool.read(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT full_path FROM file_entries
                     WHERE full_path LIKE ?1 ESCAPE '\\'
                       AND full_path NOT LIKE ?2 ESCAPE '\\'",
                )
                .map_err(|e| SeekError::StoreQueryFailed(e.to_string()))?;
            let rows = stmt
                .query_map(params![one_level, deeper], |row| row.get::<_, String>(0))
                .map_err(|e| SeekError::StoreQueryFailed(e.to_string()))?;
            let mut paths = Vec::new();
            for row in rows {
                paths.push(row.map_err(|e| SeekError::StoreQueryFailed(e.to_string()))?);
            }
            Ok(paths)
        })
    }

    pub fn entry_count(&self) -> Result<i64> {
        self.pool.read(|conn| {
            conn.query_row("SELECT COUNT(*) FROM file_entries", [], |row| row.get(0))
                .map_err(|e| SeekError::StoreQueryFailed(e.to_string()))
        })
    }

    // -----------------------------------------------------------------
    // Metadata
    // -----------------------------------------------------------------

    pub fn metadata(&self) -> Result<IndexingMetadata> {
        self.pool.read(|conn| read_metadata(conn))
    }

    pub fn indexing_status(&self) -> Result<IndexingStatus> {
        let metadata = self.metadata()?;
        let file_count = self.entry_count()?;
        Ok(IndexingStatus {
            is_indexed: metadata.is_indexed,
            last_indexed_date: metadata.last_indexed_date,
            indexed_paths: metadata.indexed_paths,
            file_count,
        })
    }

    /// Truncates entries and resets the metadata row to its zero state,
    /// including the event-id cursor. This is the only place the cursor
    /// is cleared.
    pub fn recreate(&self) -> Result<()> {
        self.pool.write(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| SeekError::StoreQueryFailed(e.to_string()))?;
            tx.execute("DELETE FROM file_entries", [])
                .map_err(|e| SeekError::StoreQueryFailed(e.to_string()))?;
            tx.execute(
                "UPDATE indexing_metadata
                 SET is_indexed = 0,
                     last_indexed_date = NULL,
                     indexed_paths = NULL,
                     total_files_indexed = 0,
                     last_event_id = NULL
                 WHERE id = 1",
                [],
            )
            .map_err(|e| SeekError::StoreQueryFailed(e.to_string()))?;
            tx.commit()
                .map_err(|e| SeekError::StoreQueryFailed(e.to_string()))?;
            Ok(())
        })
    }

    /// Marks the store fully indexed for `roots`.
    pub fn mark_indexed(&self, roots: &[PathBuf], total_files: i64, when: f64) -> Result<()> {
        let paths_json = serde_json::to_string(
            &roots
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect::<Vec<_>>(),
        )
        .map_err(|e| SeekError::StoreInvalidData(e.to_string()))?;
        self.pool.write(|conn| {
            conn.execute(
                "UPDATE indexing_metadata
                 SET is_indexed = 1,
                     last_indexed_date = ?1,
                     indexed_paths = ?2,
                     total_files_indexed = ?3
                 WHERE id = 1",
                params![when, paths_json, total_files],
            )
            .map_err(|e| SeekError::StoreQueryFailed(e.to_string()))?;
            Ok(())
        })
    }

    /// Records that indexing failed or was invalidated.
    pub fn mark_not_indexed(&self) -> Result<()> {
        self.pool.write(|conn| {
            conn.execute(
                "UPDATE indexing_metadata SET is_indexed = 0 WHERE id = 1",
                [],
            )
            .map_err(|e| SeekError::StoreQueryFailed(e.to_string()))?;
            Ok(())
        })
    }

    /// Refreshes bookkeeping after a resumable refresh pass.
    pub fn touch_indexed(&self, total_files: i64, when: f64) -> Result<()> {
        self.pool.write(|conn| {
            conn.execute(
                "UPDATE indexing_metadata
                 SET last_indexed_date = ?1, total_files_indexed = ?2
                 WHERE id = 1",
                params![when, total_files],
            )
            .map_err(|e| SeekError::StoreQueryFailed(e.to_string()))?;
            Ok(())
        })
    }

    pub fn last_event_id(&self) -> Result<Option<u64>> {
        self.pool.read(|conn| {
            conn.query_row(
                "SELECT last_event_id FROM indexing_metadata WHERE id = 1",
                [],
                |row| row.get::<_, Option<i64>>(0),
            )
            .optional()
            .map_err(|e| SeekError::StoreQueryFailed(e.to_string()))
            .map(|row| row.flatten().map(|id| id as u64))
        })
    }

    /// Persists the monitor's resume cursor. Monotone and idempotent:
    /// an older id never overwrites a newer one.
    pub fn checkpoint_event_id(&self, event_id: u64) -> Result<()> {
        self.pool.write(|conn| {
            conn.execute(
                "UPDATE indexing_metadata
                 SET last_event_id = ?1
                 WHERE id = 1 AND COALESCE(last_event_id, 0) <= ?1",
                params![event_id as i64],
            )
            .map_err(|e| SeekError::StoreQueryFailed(e.to_string()))?;
            Ok(())
        })
    }

    // -----------------------------------------------------------------
    // Stats
    // -----------------------------------------------------------------

    /// Database file size including the WAL/SHM sidecars.
    pub fn index_size_bytes(&self) -> u64 {
        let base = self.pool.db_path();
        let sidecar = |suffix: &str| {
            let mut os = base.as_os_str().to_owned();
            os.push(suffix);
            std::fs::metadata(PathBuf::from(os))
                .map(|m| m.len())
                .unwrap_or(0)
        };
        std::fs::metadata(base).map(|m| m.len()).unwrap_or(0) + sidecar("-wal") + sidecar("-shm")
    }

    pub fn search_stats(&self) -> Result<SearchStats> {
        Ok(SearchStats {
            total_files: self.entry_count()?,
            index_size_bytes: self.index_size_bytes(),
        })
    }
}

fn insert_all(conn: &Connection, entries: &[Entry]) -> Result<()> {
    let mut stmt = conn
        .prepare_cached(
            "INSERT OR REPLACE INTO file_entries
             (name, full_path, is_directory, file_extension, size, date_modified)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .map_err(|e| SeekError::StoreQueryFailed(e.to_string()))?;
    for entry in entries {
        stmt.execute(params![
            entry.name,
            entry.full_path,
            entry.is_directory,
            entry.file_extension,
            entry.size,
            entry.date_modified,
        ])
        .map_err(|e| SeekError::StoreQueryFailed(e.to_string()))?;
    }
    Ok(())
}

fn read_metadata(conn: &Connection) -> Result<IndexingMetadata> {
    let row = conn
        .query_row(
            "SELECT is_indexed, last_indexed_date, indexed_paths,
                    total_files_indexed, indexing_version, last_event_id
             FROM indexing_metadata WHERE id = 1",
            [],
            |row| {
                Ok((
                    row.get::<_, bool>(0)?,
                    row.get::<_, Option<f64>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                    row.get::<_, Option<i64>>(5)?,
                ))
            },
        )
        .optional()
        .map_err(|e| SeekError::StoreQueryFailed(e.to_string()))?;

    let Some((is_indexed, last_indexed_date, paths_json, total, version, event_id)) = row else {
        return Ok(IndexingMetadata::default());
    };

    let indexed_paths = match paths_json {
        Some(json) => serde_json::from_str::<Vec<String>>(&json)
            .map_err(|e| SeekError::StoreInvalidData(format!("indexed_paths: {e}")))?
            .into_iter()
            .map(PathBuf::from)
            .collect(),
        None => Vec::new(),
    };

    Ok(IndexingMetadata {
        is_indexed,
        last_indexed_date,
        indexed_paths,
        total_files_indexed: total,
        indexing_version: version,
        last_event_id: event_id.map(|id| id as u64),
    })
}

/// Escapes LIKE metacharacters so user paths match literally.
pub fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
