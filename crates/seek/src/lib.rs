//! Desktop-local file search index.
//!
//! Seek answers sub-second name queries over every accessible file on
//! the machine: a parallel crawler fills a SQLite store (one row per
//! item, FTS-backed name index), a change monitor consumes the
//! kernel's filesystem event stream to keep the store live, and a
//! query engine turns free-text / wildcard / boolean / key-value
//! queries into parameterized SQL.
//!
//! ## Module structure
//!
//! - `storage`: schema, connection pool, entry factory
//! - `policy`: which paths are worth indexing
//! - `indexer`: scanner, work-queue coordinator, full/refresh passes
//! - `watcher`: typed kernel event stream (FSEvents / notify)
//! - `monitor`: batched live updates and event-id checkpointing
//! - `query`: tokenizer, validator, parser, SQL planner
//! - `search`: plan execution with deterministic ordering
//! - `service`: application root bundling the services

pub mod cancel;
pub mod clock;
pub mod error;
pub mod indexer;
pub mod monitor;
pub mod policy;
pub mod query;
pub mod search;
pub mod service;
pub mod storage;
pub mod types;
pub mod watcher;

pub use cancel::{CancellationToken, SearchVersionTracker};
pub use clock::Clock;
pub use error::{QueryError, Result, SeekError};
pub use indexer::{Indexer, IndexerConfig, IndexingOutcome, ProgressCallback};
pub use monitor::{ChangeMonitor, MonitorConfig};
pub use policy::ExclusionPolicy;
pub use search::{SearchService, DEFAULT_SEARCH_LIMIT};
pub use service::{Seek, SeekConfig};
pub use storage::{ConnectionPool, Store};
pub use types::{
    Entry, IndexingStatus, MonitorState, MonitoringStatus, SearchResult, SearchStats,
};
