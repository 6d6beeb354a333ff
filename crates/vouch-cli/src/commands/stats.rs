//! `vouch stats` - run and global statistics.

use std::path::Path;

use anyhow::Result;
use vouch_core::repo::EventRepository;

use super::{current_run, open_repo, short};

pub fn run(db: &Path) -> Result<()> {
    let repo = open_repo(db)?;
    let run_id = current_run(&repo)?;

    let run = repo.run_stats(&run_id)?;
    let global = repo.global_stats()?;

    println!("Run {}:", short(&run_id));
    println!("  events:  {}", run.total_events);
    println!("  blocked: {}", run.blocked_count);

    if !run.risk_breakdown.is_empty() {
        let mut levels: Vec<_> = run.risk_breakdown.iter().collect();
        levels.sort_by(|a, b| a.0.cmp(b.0));
        println!("  risk breakdown:");
        for (level, count) in levels {
            println!("    {level:<9} {count}");
        }
    }

    println!("Global:");
    println!("  runs:    {}", global.total_runs);
    println!("  events:  {}", global.total_events);
    Ok(())
}
