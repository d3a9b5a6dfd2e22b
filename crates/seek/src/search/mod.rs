//! Search execution: plan → SELECT → materialized entries.
//!
//! Ordering is authoritative and deterministic: `LENGTH(name) ASC,
//! name ASC`, ties broken lexicographically. A new search cancels any
//! in-flight predecessor through the version tracker; a cancelled
//! search delivers no partial results.

use std::time::Instant;

use rusqlite::ToSql;

use crate::cancel::{CancellationToken, SearchVersionTracker};
use crate::error::{QueryError, Result, SeekError};
use crate::query::{parse_query, plan, DateContext};
use crate::storage::Store;
use crate::types::{Entry, SearchResult};

/// Default row cap when the caller does not provide one.
pub const DEFAULT_SEARCH_LIMIT: usize = 1000;

#[derive(Debug)]
pub struct SearchService {
    store: Store,
    tracker: SearchVersionTracker,
}

impl SearchService {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            tracker: SearchVersionTracker::new(),
        }
    }

    /// Runs a query to completion, cancelling older in-flight searches.
    /// An empty query returns no rows rather than failing.
    pub fn search(&self, query: &str, limit: usize) -> Result<SearchResult> {
        let started = Instant::now();
        let version = self.tracker.next_version();
        let token = self.tracker.token_for_version(version);
        match self.search_with_token(query, limit, &token)? {
            Some(result) => Ok(result),
            // Superseded mid-flight by a newer search; deliver nothing.
            None => Ok(SearchResult {
                entries: Vec::new(),
                search_time_seconds: started.elapsed().as_secs_f64(),
            }),
        }
    }

    /// Cancellable variant: returns `Ok(None)` when `token` was
    /// superseded before results could be delivered.
    pub fn search_with_token(
        &self,
        query: &str,
        limit: usize,
        token: &CancellationToken,
    ) -> Result<Option<SearchResult>> {
        let started = Instant::now();

        let expression = match parse_query(query) {
            Ok(expression) => expression,
            Err(QueryError::Empty) => {
                return Ok(Some(SearchResult {
                    entries: Vec::new(),
                    search_time_seconds: started.elapsed().as_secs_f64(),
                }));
            }
            Err(error) => return Err(error.into()),
        };

        if token.is_active().is_none() {
            return Ok(None);
        }

        let query_plan = plan(&expression, &DateContext::capture());
        let sql = format!(
            "SELECT name, full_path, is_directory, file_extension, size, date_modified
             FROM file_entries
             WHERE {}
             ORDER BY LENGTH(name), name
             LIMIT ?",
            query_plan.where_clause
        );

        let limit_value = limit.min(i64::MAX as usize) as i64;
        let entries = self.store.pool().read(|conn| {
            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| SeekError::StoreQueryFailed(e.to_string()))?;

            let mut params: Vec<&dyn ToSql> = query_plan
                .bindings
                .iter()
                .map(|binding| binding as &dyn ToSql)
                .collect();
            params.push(&limit_value);

            let rows = stmt
                .query_map(params.as_slice(), |row| {
                    Ok(Entry {
                        name: row.get(0)?,
                        full_path: row.get(1)?,
                        is_directory: row.get(2)?,
                        file_extension: row.get(3)?,
                        size: row.get(4)?,
                        date_modified: row.get(5)?,
                    })
                })
                .map_err(|e| SeekError::StoreQueryFailed(e.to_string()))?;

            let mut entries = Vec::new();
            for row in rows {
                match row {
                    Ok(entry) => entries.push(entry),
                    Err(error) => {
                        tracing::warn!(%error, "row materialization failed, row skipped");
                    }
                }
            }
            Ok(entries)
        })?;

        if token.is_active().is_none() {
            return Ok(None);
        }

        let elapsed = started.elapsed().as_secs_f64();
        tracing::debug!(
            query,
            results = entries.len(),
            elapsed_ms = (elapsed * 1000.0) as u64,
            "search finished"
        );
        Ok(Some(SearchResult {
            entries,
            search_time_seconds: elapsed,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::unix_now_secs;

    fn temp_service() -> (tempfile::TempDir, Store, SearchService) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Store::open(&dir.path().join("index.db")).expect("open store");
        let service = SearchService::new(store.clone());
        (dir, store, service)
    }

    fn file(name: &str, path: &str) -> Entry {
        Entry {
            name: name.to_string(),
            full_path: path.to_string(),
            is_directory: false,
            file_extension: name
                .rsplit_once('.')
                .map(|(_, ext)| ext.to_ascii_lowercase()),
            size: Some(100),
            date_modified: 1_000_000.0,
        }
    }

    fn directory(name: &str, path: &str) -> Entry {
        Entry {
            name: name.to_string(),
            full_path: path.to_string(),
            is_directory: true,
            file_extension: None,
            size: None,
            date_modified: 1_000_000.0,
        }
    }

    fn names(result: &SearchResult) -> Vec<&str> {
        result.entries.iter().map(|e| e.name.as_str()).collect()
    }

    fn seed_report_tree(store: &Store) {
        store
            .upsert_entries(&[
                file("readme.md", "/r/readme.md"),
                file("report.txt", "/r/report.txt"),
                file("report-2024.txt", "/r/report-2024.txt"),
                directory("raw", "/r/raw"),
            ])
            .expect("seed");
    }

    #[test]
    fn simple_prefix_search_orders_by_length_then_name() {
        let (_dir, store, service) = temp_service();
        seed_report_tree(&store);

        let result = service.search("re", 100).expect("search");
        assert_eq!(names(&result), vec!["readme.md", "report.txt", "report-2024.txt"]);
    }

    #[test]
    fn multi_term_query_uses_substring_semantics() {
        let (_dir, store, service) = temp_service();
        seed_report_tree(&store);

        let result = service.search("re port", 100).expect("search");
        assert_eq!(names(&result), vec!["report.txt", "report-2024.txt"]);
    }

    #[test]
    fn boolean_or_combines_result_sets() {
        let (_dir, store, service) = temp_service();
        seed_report_tree(&store);

        let result = service.search("report | raw", 100).expect("search");
        assert_eq!(names(&result), vec!["raw", "report.txt", "report-2024.txt"]);
    }

    #[test]
    fn wildcard_star_and_question_mark() {
        let (_dir, store, service) = temp_service();
        seed_report_tree(&store);

        let result = service.search("rep*.txt", 100).expect("search");
        assert_eq!(names(&result), vec!["report.txt", "report-2024.txt"]);

        let result = service.search("rep?rt.txt", 100).expect("search");
        assert_eq!(names(&result), vec!["report.txt"]);
    }

    #[test]
    fn quoted_search_is_exact_and_case_insensitive() {
        let (_dir, store, service) = temp_service();
        seed_report_tree(&store);

        let result = service.search("\"README.MD\"", 100).expect("search");
        assert_eq!(names(&result), vec!["readme.md"]);

        let result = service.search("\"readme\"", 100).expect("search");
        assert!(result.entries.is_empty(), "exact match must not be substring");
    }

    #[test]
    fn size_and_extension_predicates_combine() {
        let (_dir, store, service) = temp_service();
        let mut small = file("a.bin", "/r/a.bin");
        small.size = Some(50 * 1024 * 1024);
        let mut large = file("b.bin", "/r/b.bin");
        large.size = Some(200 * 1024 * 1024);
        store.upsert_entries(&[small, large]).expect("seed");

        let result = service.search("ext:bin size:>100MB", 100).expect("search");
        assert_eq!(names(&result), vec!["b.bin"]);

        let result = service.search("size:10", 100).expect("search");
        assert!(result.entries.is_empty(), "size:10 means exactly ten bytes");
    }

    #[test]
    fn type_folder_returns_directories_only() {
        let (_dir, store, service) = temp_service();
        seed_report_tree(&store);

        let result = service.search("type:folder", 100).expect("search");
        assert_eq!(names(&result), vec!["raw"]);
    }

    #[test]
    fn modified_today_matches_fresh_entries_only() {
        let (_dir, store, service) = temp_service();
        let mut fresh = file("fresh.txt", "/r/fresh.txt");
        fresh.date_modified = unix_now_secs();
        let mut stale = file("stale.txt", "/r/stale.txt");
        stale.date_modified = 1_000_000.0; // 1970s
        store.upsert_entries(&[fresh, stale]).expect("seed");

        let result = service.search("modified:today", 100).expect("search");
        assert_eq!(names(&result), vec!["fresh.txt"]);
    }

    #[test]
    fn empty_query_returns_no_rows_without_failing() {
        let (_dir, store, service) = temp_service();
        seed_report_tree(&store);

        let result = service.search("   ", 100).expect("search");
        assert!(result.entries.is_empty());
    }

    #[test]
    fn parse_errors_surface_with_their_kind() {
        let (_dir, _store, service) = temp_service();
        let error = service.search("(a", 100).expect_err("should fail");
        assert!(matches!(
            error,
            SeekError::Query(QueryError::UnbalancedParentheses)
        ));
    }

    #[test]
    fn limit_caps_the_result_set() {
        let (_dir, store, service) = temp_service();
        let entries: Vec<Entry> = (0..20)
            .map(|i| file(&format!("file-{i:02}.txt"), &format!("/r/file-{i:02}.txt")))
            .collect();
        store.upsert_entries(&entries).expect("seed");

        let result = service.search("file", 5).expect("search");
        assert_eq!(result.entries.len(), 5);
    }

    #[test]
    fn cancelled_token_delivers_no_partial_results() {
        let (_dir, store, service) = temp_service();
        seed_report_tree(&store);

        let version = service.tracker.next_version();
        let token = service.tracker.token_for_version(version);
        service.tracker.next_version(); // supersede immediately

        let result = service
            .search_with_token("report", 100, &token)
            .expect("search");
        assert!(result.is_none(), "superseded search must deliver nothing");
    }

    #[test]
    fn upsert_then_exact_search_round_trips() {
        let (_dir, store, service) = temp_service();
        let entry = file("unique-name.bin", "/r/unique-name.bin");
        store.upsert_entries(std::slice::from_ref(&entry)).expect("upsert");

        let result = service.search("\"unique-name.bin\"", 10).expect("search");
        assert_eq!(result.entries, vec![entry.clone()]);

        store
            .delete_paths(&[entry.full_path.clone()])
            .expect("delete");
        let result = service.search("\"unique-name.bin\"", 10).expect("search");
        assert!(result.entries.is_empty());
    }
}
