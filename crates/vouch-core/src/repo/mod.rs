//! Event storage: the `EventRepository` capability trait and its SQLite
//! backend.
//!
//! The trait is the full capability set the daemon and CLI consume (append,
//! query by run/task/id, stats, run records); any concrete store satisfying
//! it is pluggable. Only the ledger worker writes; readers are independent.

mod sqlite;

use thiserror::Error;

pub use sqlite::SqliteEventRepository;

use crate::event::{Event, GlobalStats, RunInfo, RunStats};

/// Errors from repository operations.
#[derive(Debug, Error)]
pub enum RepoError {
    /// Underlying SQLite failure.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A run with this id already exists.
    #[error("duplicate run id: {0}")]
    DuplicateRun(String),

    /// A stored params/response column is not valid JSON.
    #[error("decoding stored JSON column: {0}")]
    Json(#[from] serde_json::Error),

    /// A stored timestamp column does not parse as RFC 3339.
    #[error("invalid stored timestamp {value:?}: {source}")]
    Timestamp {
        /// The offending column value.
        value: String,
        /// The parse failure.
        source: chrono::ParseError,
    },
}

/// Append-only event store.
///
/// Implementations must preserve ordering by `(run_id, seq_index)` and write
/// each event atomically.
pub trait EventRepository: Send + Sync {
    /// Creates a run record. Fails on duplicate id.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError::DuplicateRun`] when the id exists.
    fn insert_run(
        &self,
        run_id: &str,
        agent_name: &str,
        genesis_hash: &str,
        ledger_pub_key: &str,
    ) -> Result<(), RepoError>;

    /// Appends a finalized event (all columns, atomically).
    ///
    /// # Errors
    ///
    /// Returns [`RepoError`] on storage failure.
    fn store_event(&self, event: &Event) -> Result<(), RepoError>;

    /// Returns `(seq_index, current_hash)` of the newest event in a run, or
    /// `None` for an empty run.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError`] on query failure.
    fn last_event(&self, run_id: &str) -> Result<Option<(u64, String)>, RepoError>;

    /// Looks up one event by id.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError`] on query failure.
    fn event_by_id(&self, event_id: &str) -> Result<Option<Event>, RepoError>;

    /// Returns a task's events ordered by `seq_index`.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError`] on query failure.
    fn events_by_task(&self, task_id: &str) -> Result<Vec<Event>, RepoError>;

    /// Returns all events of a run ordered by `seq_index`.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError`] on query failure.
    fn all_events(&self, run_id: &str) -> Result<Vec<Event>, RepoError>;

    /// Returns the newest `limit` events of a run, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError`] on query failure.
    fn recent_events(&self, run_id: &str, limit: u64) -> Result<Vec<Event>, RepoError>;

    /// Returns events across all runs with `risk_level` in
    /// `{high, critical}`.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError`] on query failure.
    fn risk_events(&self) -> Result<Vec<Event>, RepoError>;

    /// Returns `true` when at least one run exists.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError`] on query failure.
    fn has_runs(&self) -> Result<bool, RepoError>;

    /// Returns the current (most recently started) run id.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError`] on query failure.
    fn current_run_id(&self) -> Result<Option<String>, RepoError>;

    /// Returns a run's record.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError`] on query failure.
    fn run_info(&self, run_id: &str) -> Result<Option<RunInfo>, RepoError>;

    /// Returns aggregate statistics for one run.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError`] on query failure.
    fn run_stats(&self, run_id: &str) -> Result<RunStats, RepoError>;

    /// Returns aggregate statistics across all runs.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError`] on query failure.
    fn global_stats(&self) -> Result<GlobalStats, RepoError>;

    /// Flushes the store to durable storage. Called once by the worker
    /// after its final drain; the connection itself is released on drop.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError`] when the flush fails.
    fn close(&self) -> Result<(), RepoError>;
}
