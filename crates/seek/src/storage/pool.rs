//! Connection pool: one serialized writer, a small set of readers, and
//! a transient bulk-load mode entered only by the indexer.
//!
//! `read` and `write` are scoped operations: the closure runs with a
//! borrowed connection and the pool reclaims it afterwards. No lock is
//! held beyond the closure's lifetime.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

use rusqlite::Connection;

use crate::error::{Result, SeekError};

use super::pragmas;
use super::schema;

/// Number of reader connections opened by default.
pub const DEFAULT_READER_COUNT: usize = 4;

pub struct ConnectionPool {
    db_path: PathBuf,
    writer: Mutex<Option<Connection>>,
    readers: Mutex<Vec<Connection>>,
    reader_returned: Condvar,
    reader_count: usize,
    bulk_active: AtomicBool,
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("db_path", &self.db_path)
            .field("reader_count", &self.reader_count)
            .finish()
    }
}

impl ConnectionPool {
    /// Opens the store at `path`, creating the schema if needed, and
    /// warms up the reader pool.
    pub fn open(path: &Path, reader_count: usize) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SeekError::StoreConnectionFailed(e.to_string()))?;
        }

        let writer = open_writer(path)?;
        schema::initialize(&writer)?;

        let mut readers = Vec::with_capacity(reader_count);
        for _ in 0..reader_count {
            readers.push(open_reader(path)?);
        }

        Ok(Self {
            db_path: path.to_path_buf(),
            writer: Mutex::new(Some(writer)),
            readers: Mutex::new(readers),
            reader_returned: Condvar::new(),
            reader_count,
            bulk_active: AtomicBool::new(false),
        })
    }

    /// Path of the main database file.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Runs `f` with the single write connection. Writes are fully
    /// serialized; callers queue on the mutex.
    pub fn write<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let guard = self
            .writer
            .lock()
            .map_err(|_| SeekError::StoreUnavailable("writer lock poisoned".to_string()))?;
        let conn = guard
            .as_ref()
            .ok_or_else(|| SeekError::StoreUnavailable("writer not connected".to_string()))?;
        f(conn)
    }

    /// Runs `f` with a reader connection checked out of the pool.
    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.checkout_reader()?;
        let result = f(&conn);
        self.checkin_reader(conn);
        result
    }

    fn checkout_reader(&self) -> Result<Connection> {
        if self.reader_count == 0 {
            return Err(SeekError::StoreUnavailable(
                "reader pool not initialized".to_string(),
            ));
        }
        let mut guard = self
            .readers
            .lock()
            .map_err(|_| SeekError::StoreUnavailable("reader lock poisoned".to_string()))?;
        loop {
            if let Some(conn) = guard.pop() {
                return Ok(conn);
            }
            guard = self
                .reader_returned
                .wait(guard)
                .map_err(|_| SeekError::StoreUnavailable("reader lock poisoned".to_string()))?;
        }
    }

    fn checkin_reader(&self, conn: Connection) {
        if let Ok(mut guard) = self.readers.lock() {
            guard.push(conn);
            self.reader_returned.notify_one();
        }
    }

    // -----------------------------------------------------------------
    // Bulk mode (indexer only)
    // -----------------------------------------------------------------

    /// Switches the writer into bulk-load pragmas and opens the single
    /// long transaction the full-index build runs inside.
    pub fn begin_bulk(&self) -> Result<()> {
        self.write(|conn| {
            pragmas::apply_bulk_pragmas(conn)?;
            conn.execute_batch("BEGIN IMMEDIATE;")
                .map_err(|e| SeekError::StoreQueryFailed(e.to_string()))?;
            Ok(())
        })?;
        self.bulk_active.store(true, Ordering::SeqCst);
        tracing::debug!("bulk mode entered");
        Ok(())
    }

    /// Commits the bulk transaction, restores write pragmas, and
    /// compacts with VACUUM + ANALYZE.
    pub fn commit_bulk(&self) -> Result<()> {
        let result = self.write(|conn| {
            conn.execute_batch("COMMIT;")
                .map_err(|e| SeekError::StoreQueryFailed(e.to_string()))?;
            pragmas::restore_write_pragmas(conn)?;
            conn.execute_batch("VACUUM; ANALYZE;")
                .map_err(|e| SeekError::StoreQueryFailed(e.to_string()))?;
            Ok(())
        });
        self.bulk_active.store(false, Ordering::SeqCst);
        tracing::debug!("bulk mode committed");
        result
    }

    /// Rolls back the bulk transaction and restores write pragmas.
    pub fn abort_bulk(&self) -> Result<()> {
        let result = self.write(|conn| {
            // A failed COMMIT may already have ended the transaction.
            let _ = conn.execute_batch("ROLLBACK;");
            pragmas::restore_write_pragmas(conn)
        });
        self.bulk_active.store(false, Ordering::SeqCst);
        tracing::warn!("bulk mode aborted");
        result
    }

    /// True while the indexer holds the bulk transaction open. Batch
    /// writes skip their own transaction wrapper in that window.
    pub fn bulk_active(&self) -> bool {
        self.bulk_active.load(Ordering::SeqCst)
    }

    // -----------------------------------------------------------------
    // Health
    // -----------------------------------------------------------------

    /// Scalar probe through a reader connection.
    pub fn health_check(&self) -> Result<()> {
        let probe: i64 = self.read(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get(0))
                .map_err(|e| SeekError::StoreQueryFailed(e.to_string()))
        })?;
        if probe == 1 {
            Ok(())
        } else {
            Err(SeekError::StoreInvalidData(format!(
                "health probe returned {probe}"
            )))
        }
    }

    /// Drops every connection and reopens them from the stored path.
    pub fn reconnect(&self) -> Result<()> {
        {
            let mut guard = self
                .writer
                .lock()
                .map_err(|_| SeekError::StoreUnavailable("writer lock poisoned".to_string()))?;
            *guard = None;
            let writer = open_writer(&self.db_path)?;
            schema::initialize(&writer)?;
            *guard = Some(writer);
        }

        let mut guard = self
            .readers
            .lock()
            .map_err(|_| SeekError::StoreUnavailable("reader lock poisoned".to_string()))?;
        guard.clear();
        for _ in 0..self.reader_count {
            guard.push(open_reader(&self.db_path)?);
        }
        self.reader_returned.notify_all();
        self.bulk_active.store(false, Ordering::SeqCst);
        Ok(())
    }
}

fn open_writer(path: &Path) -> Result<Connection> {
    let conn =
        Connection::open(path).map_err(|e| SeekError::StoreConnectionFailed(e.to_string()))?;
    pragmas::apply_write_pragmas(&conn)?;
    Ok(conn)
}

fn open_reader(path: &Path) -> Result<Connection> {
    let conn =
        Connection::open(path).map_err(|e| SeekError::StoreConnectionFailed(e.to_string()))?;
    pragmas::apply_read_pragmas(&conn)?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_pool() -> (tempfile::TempDir, ConnectionPool) {
        let dir = tempfile::tempdir().expect("tempdir");
        let pool = ConnectionPool::open(&dir.path().join("index.db"), 2).expect("open pool");
        (dir, pool)
    }

    #[test]
    fn writes_are_visible_to_readers() {
        let (_dir, pool) = temp_pool();
        pool.write(|conn| {
            conn.execute(
                "INSERT INTO file_entries (name, full_path, is_directory, date_modified)
                 VALUES ('a.txt', '/r/a.txt', 0, 1.0)",
                [],
            )
            .map_err(|e| SeekError::StoreQueryFailed(e.to_string()))?;
            Ok(())
        })
        .expect("write");

        let count: i64 = pool
            .read(|conn| {
                conn.query_row("SELECT COUNT(*) FROM file_entries", [], |row| row.get(0))
                    .map_err(|e| SeekError::StoreQueryFailed(e.to_string()))
            })
            .expect("read");
        assert_eq!(count, 1);
    }

    #[test]
    fn readers_reject_writes() {
        let (_dir, pool) = temp_pool();
        let result = pool.read(|conn| {
            conn.execute("DELETE FROM file_entries", [])
                .map_err(|e| SeekError::StoreQueryFailed(e.to_string()))?;
            Ok(())
        });
        assert!(result.is_err(), "query_only reader must refuse writes");
    }

    #[test]
    fn bulk_mode_round_trip_commits() {
        let (_dir, pool) = temp_pool();
        pool.begin_bulk().expect("begin bulk");
        assert!(pool.bulk_active());
        pool.write(|conn| {
            conn.execute(
                "INSERT INTO file_entries (name, full_path, is_directory, date_modified)
                 VALUES ('b.txt', '/r/b.txt', 0, 1.0)",
                [],
            )
            .map_err(|e| SeekError::StoreQueryFailed(e.to_string()))?;
            Ok(())
        })
        .expect("write in bulk");
        pool.commit_bulk().expect("commit bulk");
        assert!(!pool.bulk_active());

        let count: i64 = pool
            .read(|conn| {
                conn.query_row("SELECT COUNT(*) FROM file_entries", [], |row| row.get(0))
                    .map_err(|e| SeekError::StoreQueryFailed(e.to_string()))
            })
            .expect("read");
        assert_eq!(count, 1);
    }

    #[test]
    fn abort_bulk_discards_pending_rows() {
        let (_dir, pool) = temp_pool();
        pool.begin_bulk().expect("begin bulk");
        pool.write(|conn| {
            conn.execute(
                "INSERT INTO file_entries (name, full_path, is_directory, date_modified)
                 VALUES ('c.txt', '/r/c.txt', 0, 1.0)",
                [],
            )
            .map_err(|e| SeekError::StoreQueryFailed(e.to_string()))?;
            Ok(())
        })
        .expect("write in bulk");
        pool.abort_bulk().expect("abort bulk");

        let count: i64 = pool
            .read(|conn| {
                conn.query_row("SELECT COUNT(*) FROM file_entries", [], |row| row.get(0))
                    .map_err(|e| SeekError::StoreQueryFailed(e.to_string()))
            })
            .expect("read");
        assert_eq!(count, 0, "rolled-back rows must not be visible");
    }

    #[test]
    fn health_check_and_reconnect() {
        let (_dir, pool) = temp_pool();
        pool.health_check().expect("healthy");
        pool.reconnect().expect("reconnect");
        pool.health_check().expect("healthy after reconnect");
    }
}
