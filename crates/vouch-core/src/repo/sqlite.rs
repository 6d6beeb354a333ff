//! SQLite-backed event repository.
//!
//! Single-writer (the ledger worker), any number of readers. The connection
//! opens in WAL mode so readers do not block the writer. Schema DDL lives
//! inline; `(run_id, seq_index)` is unique and `id` is globally unique.

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{EventRepository, RepoError};
use crate::event::{Event, GlobalStats, RunInfo, RunStats};

const EVENT_COLUMNS: &str = "id, run_id, seq_index, timestamp, actor, event_type, method, \
     params, response, task_id, task_state, parent_id, policy_id, risk_level, \
     prev_hash, current_hash, signature, was_blocked";

/// Append-only SQLite store for runs and events.
#[derive(Debug)]
pub struct SqliteEventRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEventRepository {
    /// Opens (creating if needed) the database at `path` and initializes the
    /// schema.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError`] if the file cannot be opened or the schema
    /// cannot be applied.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RepoError> {
        let conn = Connection::open(path)?;
        // WAL keeps readers (CLI, verifier) from blocking the single writer.
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Opens an in-memory database. Used by tests and the verifier harness.
    ///
    /// # Errors
    ///
    /// Returns [`RepoError`] if the schema cannot be applied.
    pub fn open_in_memory() -> Result<Self, RepoError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> Result<(), RepoError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                agent_name TEXT NOT NULL,
                started_at TEXT NOT NULL,
                genesis_hash TEXT NOT NULL,
                ledger_pub_key TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL REFERENCES runs(id),
                seq_index INTEGER NOT NULL,
                timestamp TEXT NOT NULL,
                actor TEXT NOT NULL,
                event_type TEXT NOT NULL,
                method TEXT NOT NULL,
                params TEXT NOT NULL,
                response TEXT NOT NULL,
                task_id TEXT NOT NULL DEFAULT '',
                task_state TEXT NOT NULL DEFAULT '',
                parent_id TEXT NOT NULL DEFAULT '',
                policy_id TEXT NOT NULL DEFAULT '',
                risk_level TEXT NOT NULL DEFAULT '',
                prev_hash TEXT NOT NULL,
                current_hash TEXT NOT NULL,
                signature TEXT NOT NULL,
                was_blocked INTEGER NOT NULL DEFAULT 0,
                UNIQUE (run_id, seq_index)
            );
            CREATE INDEX IF NOT EXISTS idx_events_run_seq ON events(run_id, seq_index);
            CREATE INDEX IF NOT EXISTS idx_events_task ON events(task_id);
            CREATE INDEX IF NOT EXISTS idx_events_risk ON events(risk_level);",
        )?;
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Clones the shared connection handle. Tests use this to tamper with
    /// rows out-of-band.
    #[must_use]
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<(Event, String, String, String)> {
    let timestamp: String = row.get(3)?;
    let params: String = row.get(7)?;
    let response: String = row.get(8)?;
    let event = Event {
        id: row.get(0)?,
        run_id: row.get(1)?,
        seq_index: row.get(2)?,
        timestamp: Utc::now(), // replaced by the parsed column below
        actor: row.get(4)?,
        event_type: row.get(5)?,
        method: row.get(6)?,
        params: serde_json::Value::Null,
        response: serde_json::Value::Null,
        task_id: row.get(9)?,
        task_state: row.get(10)?,
        parent_id: row.get(11)?,
        policy_id: row.get(12)?,
        risk_level: row.get(13)?,
        prev_hash: row.get(14)?,
        current_hash: row.get(15)?,
        signature: row.get(16)?,
        was_blocked: row.get(17)?,
    };
    Ok((event, timestamp, params, response))
}

fn finish_event(
    (mut event, timestamp, params, response): (Event, String, String, String),
) -> Result<Event, RepoError> {
    let parsed: DateTime<chrono::FixedOffset> =
        DateTime::parse_from_rfc3339(&timestamp).map_err(|source| RepoError::Timestamp {
            value: timestamp,
            source,
        })?;
    event.timestamp = parsed.with_timezone(&Utc);
    event.params = serde_json::from_str(&params)?;
    event.response = serde_json::from_str(&response)?;
    Ok(event)
}

fn collect_events(
    conn: &Connection,
    sql: &str,
    query_params: impl rusqlite::Params,
) -> Result<Vec<Event>, RepoError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(query_params, event_from_row)?;
    let mut events = Vec::new();
    for row in rows {
        events.push(finish_event(row?)?);
    }
    Ok(events)
}

impl EventRepository for SqliteEventRepository {
    fn insert_run(
        &self,
        run_id: &str,
        agent_name: &str,
        genesis_hash: &str,
        ledger_pub_key: &str,
    ) -> Result<(), RepoError> {
        let conn = self.lock();
        let started_at = Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true);
        conn.execute(
            "INSERT INTO runs (id, agent_name, started_at, genesis_hash, ledger_pub_key)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![run_id, agent_name, started_at, genesis_hash, ledger_pub_key],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                RepoError::DuplicateRun(run_id.to_string())
            },
            other => RepoError::Sqlite(other),
        })?;
        Ok(())
    }

    fn store_event(&self, event: &Event) -> Result<(), RepoError> {
        let params_json = serde_json::to_string(&event.params)?;
        let response_json = serde_json::to_string(&event.response)?;
        let timestamp = event.timestamp_rfc3339();

        let conn = self.lock();
        conn.execute(
            "INSERT INTO events (id, run_id, seq_index, timestamp, actor, event_type, method,
                 params, response, task_id, task_state, parent_id, policy_id, risk_level,
                 prev_hash, current_hash, signature, was_blocked)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            params![
                event.id,
                event.run_id,
                event.seq_index,
                timestamp,
                event.actor,
                event.event_type,
                event.method,
                params_json,
                response_json,
                event.task_id,
                event.task_state,
                event.parent_id,
                event.policy_id,
                event.risk_level,
                event.prev_hash,
                event.current_hash,
                event.signature,
                event.was_blocked,
            ],
        )?;
        Ok(())
    }

    fn last_event(&self, run_id: &str) -> Result<Option<(u64, String)>, RepoError> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT seq_index, current_hash FROM events
                 WHERE run_id = ?1 ORDER BY seq_index DESC LIMIT 1",
                params![run_id],
                |row| Ok((row.get::<_, u64>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        Ok(row)
    }

    fn event_by_id(&self, event_id: &str) -> Result<Option<Event>, RepoError> {
        let conn = self.lock();
        let row = conn
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"),
                params![event_id],
                event_from_row,
            )
            .optional()?;
        row.map(finish_event).transpose()
    }

    fn events_by_task(&self, task_id: &str) -> Result<Vec<Event>, RepoError> {
        let conn = self.lock();
        collect_events(
            &conn,
            &format!("SELECT {EVENT_COLUMNS} FROM events WHERE task_id = ?1 ORDER BY seq_index ASC"),
            params![task_id],
        )
    }

    fn all_events(&self, run_id: &str) -> Result<Vec<Event>, RepoError> {
        let conn = self.lock();
        collect_events(
            &conn,
            &format!("SELECT {EVENT_COLUMNS} FROM events WHERE run_id = ?1 ORDER BY seq_index ASC"),
            params![run_id],
        )
    }

    fn recent_events(&self, run_id: &str, limit: u64) -> Result<Vec<Event>, RepoError> {
        let conn = self.lock();
        collect_events(
            &conn,
            &format!(
                "SELECT {EVENT_COLUMNS} FROM events WHERE run_id = ?1
                 ORDER BY seq_index DESC LIMIT ?2"
            ),
            params![run_id, limit],
        )
    }

    fn risk_events(&self) -> Result<Vec<Event>, RepoError> {
        let conn = self.lock();
        collect_events(
            &conn,
            &format!(
                "SELECT {EVENT_COLUMNS} FROM events
                 WHERE risk_level IN ('high', 'critical')
                 ORDER BY run_id, seq_index ASC"
            ),
            [],
        )
    }

    fn has_runs(&self) -> Result<bool, RepoError> {
        let conn = self.lock();
        let count: u64 = conn.query_row("SELECT COUNT(*) FROM runs", [], |row| row.get(0))?;
        Ok(count > 0)
    }

    fn current_run_id(&self) -> Result<Option<String>, RepoError> {
        let conn = self.lock();
        let id = conn
            .query_row(
                "SELECT id FROM runs ORDER BY started_at DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    fn run_info(&self, run_id: &str) -> Result<Option<RunInfo>, RepoError> {
        let conn = self.lock();
        let info = conn
            .query_row(
                "SELECT id, agent_name, started_at, genesis_hash, ledger_pub_key
                 FROM runs WHERE id = ?1",
                params![run_id],
                |row| {
                    Ok(RunInfo {
                        run_id: row.get(0)?,
                        agent_name: row.get(1)?,
                        started_at: row.get(2)?,
                        genesis_hash: row.get(3)?,
                        ledger_pub_key: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(info)
    }

    fn run_stats(&self, run_id: &str) -> Result<RunStats, RepoError> {
        let conn = self.lock();

        let total_events: u64 = conn.query_row(
            "SELECT COUNT(*) FROM events WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;
        let blocked_count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM events WHERE run_id = ?1 AND was_blocked = 1",
            params![run_id],
            |row| row.get(0),
        )?;

        let mut stats = RunStats {
            total_events,
            blocked_count,
            risk_breakdown: std::collections::HashMap::new(),
        };

        let mut stmt = conn.prepare(
            "SELECT risk_level, COUNT(*) FROM events
             WHERE run_id = ?1 AND risk_level != ''
             GROUP BY risk_level",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, u64>(1)?))
        })?;
        for row in rows {
            let (level, count) = row?;
            stats.risk_breakdown.insert(level, count);
        }

        Ok(stats)
    }

    fn global_stats(&self) -> Result<GlobalStats, RepoError> {
        let conn = self.lock();
        let total_runs: u64 = conn.query_row("SELECT COUNT(*) FROM runs", [], |row| row.get(0))?;
        let total_events: u64 =
            conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(GlobalStats {
            total_runs,
            total_events,
        })
    }

    fn close(&self) -> Result<(), RepoError> {
        // Fold the WAL back into the main database file so the file on disk
        // is complete without its -wal sidecar.
        let conn = self.lock();
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE)")?;
        Ok(())
    }
}
