//! PRAGMA profiles applied per connection role.
//!
//! Three profiles: write (WAL, NORMAL sync), read (query-only, larger
//! cache), and bulk (sync OFF, oversized cache) used only while a full
//! index build is running inside one long transaction.

use rusqlite::Connection;

use crate::error::{Result, SeekError};

/// Applies the write-mode profile: WAL journaling, NORMAL sync, 64 MB
/// cache, memory temp store, large mmap window, autocheckpoint after
/// ~10k pages.
pub fn apply_write_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA cache_size = -65536;
        PRAGMA temp_store = MEMORY;
        PRAGMA mmap_size = 30064771072;
        PRAGMA wal_autocheckpoint = 10000;
        PRAGMA busy_timeout = 30000;
        ",
    )
    .map_err(|e| SeekError::StoreConnectionFailed(e.to_string()))
}

/// Applies the read-mode profile: query-only with a 200 MB cache.
pub fn apply_read_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA query_only = ON;
        PRAGMA cache_size = -204800;
        PRAGMA temp_store = MEMORY;
        PRAGMA mmap_size = 268435456;
        PRAGMA busy_timeout = 30000;
        ",
    )
    .map_err(|e| SeekError::StoreConnectionFailed(e.to_string()))
}

/// Switches the write connection into bulk-load mode. Durability is
/// traded away for throughput; the caller wraps the whole load in a
/// single transaction and restores write mode afterwards.
pub fn apply_bulk_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA synchronous = OFF;
        PRAGMA cache_size = -262144;
        PRAGMA mmap_size = 2147483648;
        ",
    )
    .map_err(|e| SeekError::StoreConnectionFailed(e.to_string()))
}

/// Restores the write-mode profile after a bulk load.
pub fn restore_write_pragmas(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        PRAGMA synchronous = NORMAL;
        PRAGMA cache_size = -65536;
        PRAGMA mmap_size = 30064771072;
        ",
    )
    .map_err(|e| SeekError::StoreConnectionFailed(e.to_string()))
}
