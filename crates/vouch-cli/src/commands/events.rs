//! `vouch events` - list recent events.

use std::path::Path;

use anyhow::Result;
use vouch_core::repo::EventRepository;

use super::{current_run, format_event_line, open_repo, short};

pub fn run(db: &Path, limit: u64) -> Result<()> {
    let repo = open_repo(db)?;
    let run_id = current_run(&repo)?;

    let events = repo.recent_events(&run_id, limit)?;
    if events.is_empty() {
        println!("No events recorded for run {}", short(&run_id));
        return Ok(());
    }

    println!("Recent events (run {}, newest first):", short(&run_id));
    for event in &events {
        println!("{}", format_event_line(event));
    }
    Ok(())
}
