//! Table, index, FTS, and trigger DDL for the entry store.
//!
//! `file_entries_fts` is an external-content FTS5 table over `name`;
//! the AFTER INSERT/DELETE/UPDATE triggers keep it in lockstep with
//! `file_entries`, so presence in FTS is equivalent to presence in the
//! entry table.

use rusqlite::Connection;

use crate::error::{Result, SeekError};

/// Bumped whenever the DDL below changes shape. A mismatch drops and
/// recreates every object.
pub const SCHEMA_VERSION: i32 = 1;

const SCHEMA_DDL: &str = "
    CREATE TABLE IF NOT EXISTS file_entries (
        name TEXT NOT NULL,
        full_path TEXT NOT NULL UNIQUE,
        is_directory BOOLEAN NOT NULL,
        file_extension TEXT,
        size INTEGER,
        date_modified REAL NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_file_entries_name
        ON file_entries(name COLLATE NOCASE, is_directory, file_extension, size, date_modified);
    CREATE INDEX IF NOT EXISTS idx_file_entries_extension
        ON file_entries(file_extension) WHERE file_extension IS NOT NULL;
    CREATE INDEX IF NOT EXISTS idx_file_entries_size
        ON file_entries(size);
    CREATE INDEX IF NOT EXISTS idx_file_entries_modified
        ON file_entries(date_modified);
    CREATE INDEX IF NOT EXISTS idx_file_entries_is_directory
        ON file_entries(is_directory);

    CREATE VIRTUAL TABLE IF NOT EXISTS file_entries_fts USING fts5(
        name,
        content='file_entries',
        content_rowid='rowid',
        tokenize='unicode61'
    );

    CREATE TRIGGER IF NOT EXISTS file_entries_ai AFTER INSERT ON file_entries BEGIN
        INSERT INTO file_entries_fts(rowid, name) VALUES (new.rowid, new.name);
    END;

    CREATE TRIGGER IF NOT EXISTS file_entries_ad AFTER DELETE ON file_entries BEGIN
        INSERT INTO file_entries_fts(file_entries_fts, rowid, name)
        VALUES ('delete', old.rowid, old.name);
    END;

    CREATE TRIGGER IF NOT EXISTS file_entries_au AFTER UPDATE ON file_entries BEGIN
        INSERT INTO file_entries_fts(file_entries_fts, rowid, name)
        VALUES ('delete', old.rowid, old.name);
        INSERT INTO file_entries_fts(rowid, name) VALUES (new.rowid, new.name);
    END;

    CREATE TABLE IF NOT EXISTS indexing_metadata (
        id INTEGER PRIMARY KEY,
        is_indexed BOOLEAN NOT NULL DEFAULT 0,
        last_indexed_date REAL,
        indexed_paths TEXT,
        total_files_indexed INTEGER DEFAULT 0,
        indexing_version INTEGER DEFAULT 1,
        last_event_id INTEGER
    );

    INSERT OR IGNORE INTO indexing_metadata (id, is_indexed) VALUES (1, 0);
";

const DROP_DDL: &str = "
    DROP TRIGGER IF EXISTS file_entries_ai;
    DROP TRIGGER IF EXISTS file_entries_ad;
    DROP TRIGGER IF EXISTS file_entries_au;
    DROP TABLE IF EXISTS file_entries_fts;
    DROP TABLE IF EXISTS file_entries;
    DROP TABLE IF EXISTS indexing_metadata;
";

/// Creates all store objects, dropping stale ones when the persisted
/// `user_version` does not match [`SCHEMA_VERSION`].
pub fn initialize(conn: &Connection) -> Result<()> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(|e| SeekError::StoreConnectionFailed(e.to_string()))?;

    if version != 0 && version != SCHEMA_VERSION {
        tracing::warn!(
            found = version,
            expected = SCHEMA_VERSION,
            "store schema version mismatch, recreating"
        );
        conn.execute_batch(DROP_DDL)
            .map_err(|e| SeekError::StoreConnectionFailed(e.to_string()))?;
    }

    conn.execute_batch(SCHEMA_DDL)
        .map_err(|e| SeekError::StoreConnectionFailed(e.to_string()))?;
    conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION};"))
        .map_err(|e| SeekError::StoreConnectionFailed(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_is_idempotent() {
        let conn = Connection::open_in_memory().expect("open");
        initialize(&conn).expect("first init");
        initialize(&conn).expect("second init");

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM indexing_metadata", [], |row| row.get(0))
            .expect("metadata row");
        assert_eq!(count, 1, "metadata row should exist exactly once");
    }

    #[test]
    fn fts_follows_inserts_and_deletes() {
        let conn = Connection::open_in_memory().expect("open");
        initialize(&conn).expect("init");

        conn.execute(
            "INSERT INTO file_entries (name, full_path, is_directory, date_modified)
             VALUES ('readme.md', '/r/readme.md', 0, 0.0)",
            [],
        )
        .expect("insert");

        let hits: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM file_entries_fts WHERE file_entries_fts MATCH 'readme'",
                [],
                |row| row.get(0),
            )
            .expect("fts query");
        assert_eq!(hits, 1);

        conn.execute("DELETE FROM file_entries WHERE full_path = '/r/readme.md'", [])
            .expect("delete");
        let hits: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM file_entries_fts WHERE file_entries_fts MATCH 'readme'",
                [],
                |row| row.get(0),
            )
            .expect("fts query after delete");
        assert_eq!(hits, 0, "trigger should remove the FTS row");
    }

    #[test]
    fn version_mismatch_recreates_objects() {
        let conn = Connection::open_in_memory().expect("open");
        initialize(&conn).expect("init");
        conn.execute(
            "INSERT INTO file_entries (name, full_path, is_directory, date_modified)
             VALUES ('a', '/a', 0, 0.0)",
            [],
        )
        .expect("insert");

        conn.execute_batch("PRAGMA user_version = 99;").expect("bump");
        initialize(&conn).expect("reinit");

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM file_entries", [], |row| row.get(0))
            .expect("count");
        assert_eq!(count, 0, "mismatched schema should be rebuilt empty");
    }
}
