//! CLI subcommands.

pub mod events;
pub mod export;
pub mod rekey;
pub mod replay;
pub mod risk;
pub mod stats;
pub mod status;
pub mod trace;
pub mod verify;

use std::path::Path;

use anyhow::{bail, Context, Result};
use vouch_core::event::Event;
use vouch_core::repo::{EventRepository, SqliteEventRepository};

/// Opens the event database, refusing to create one: a missing ledger is a
/// missing artifact, not an empty result.
pub(crate) fn open_repo(db: &Path) -> Result<SqliteEventRepository> {
    if !db.exists() {
        bail!("no ledger database at {}", db.display());
    }
    SqliteEventRepository::open(db).with_context(|| format!("opening {}", db.display()))
}

/// Resolves the current run id, failing when the ledger holds no runs.
pub(crate) fn current_run(repo: &SqliteEventRepository) -> Result<String> {
    match repo.current_run_id()? {
        Some(run_id) => Ok(run_id),
        None => bail!("ledger holds no runs; start the daemon first"),
    }
}

/// Shortens an id for display.
pub(crate) fn short(id: &str) -> &str {
    &id[..8.min(id.len())]
}

/// One-line rendering used by `events` and `risk`.
pub(crate) fn format_event_line(event: &Event) -> String {
    let blocked = if event.was_blocked { " BLOCKED" } else { "" };
    let risk = if event.risk_level.is_empty() {
        "-"
    } else {
        &event.risk_level
    };
    format!(
        "{:>5}  {}  {:<13} {:<8} {}{}",
        event.seq_index,
        event.timestamp_rfc3339(),
        event.event_type,
        risk,
        event.method,
        blocked,
    )
}
