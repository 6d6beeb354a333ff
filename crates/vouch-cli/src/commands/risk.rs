//! `vouch risk` - list high-risk events across all runs.

use std::path::Path;

use anyhow::Result;
use vouch_core::repo::EventRepository;

use super::{format_event_line, open_repo};

pub fn run(db: &Path) -> Result<()> {
    let repo = open_repo(db)?;

    let events = repo.risk_events()?;
    if events.is_empty() {
        println!("No high-risk events recorded");
        return Ok(());
    }

    println!("High-risk events ({}):", events.len());
    for event in &events {
        println!("{}", format_event_line(event));
    }
    Ok(())
}
