//! `vouch status` - current run information.

use std::path::Path;

use anyhow::{bail, Result};
use vouch_core::repo::EventRepository;

use super::{current_run, open_repo, short};

pub fn run(db: &Path) -> Result<()> {
    let repo = open_repo(db)?;
    let run_id = current_run(&repo)?;

    let Some(info) = repo.run_info(&run_id)? else {
        bail!("run record missing for {}", short(&run_id));
    };
    let stats = repo.run_stats(&run_id)?;

    println!("Run:         {}", info.run_id);
    println!("Agent:       {}", info.agent_name);
    println!("Started:     {}", info.started_at);
    println!("Genesis:     {}", short(&info.genesis_hash));
    println!("Public key:  {}...", &info.ledger_pub_key[..16.min(info.ledger_pub_key.len())]);
    println!("Events:      {}", stats.total_events);
    println!("Blocked:     {}", stats.blocked_count);

    Ok(())
}
