//! `vouch export` - package the current run as a ZIP evidence bag.
//!
//! The bag carries the raw database, a JSON manifest (run record plus
//! statistics), and the verification report produced at export time, so a
//! recipient can re-verify the chain without this tool.

use std::fs::File;
use std::io::Write as IoWrite;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde_json::json;
use vouch_core::repo::EventRepository;
use vouch_core::verify::verify_chain;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

use super::{current_run, open_repo, short};

pub fn run(db: &Path, output: &Path) -> Result<()> {
    let repo = open_repo(db)?;
    let run_id = current_run(&repo)?;

    let Some(info) = repo.run_info(&run_id)? else {
        bail!("run record missing for {}", short(&run_id));
    };
    let stats = repo.run_stats(&run_id)?;
    let verification = verify_chain(&repo, &run_id)?;

    let manifest = json!({
        "run": {
            "run_id": info.run_id,
            "agent_name": info.agent_name,
            "started_at": info.started_at,
            "genesis_hash": info.genesis_hash,
            "ledger_pub_key": info.ledger_pub_key,
        },
        "stats": {
            "total_events": stats.total_events,
            "blocked_count": stats.blocked_count,
            "risk_breakdown": stats.risk_breakdown,
        },
        "verification": {
            "valid": verification.valid,
            "events_checked": verification.events_checked,
            "error": verification.error_message(),
        },
    });

    let report = if verification.valid {
        format!(
            "Chain is valid\nRun:    {}\nEvents: {}\n",
            short(&run_id),
            verification.events_checked
        )
    } else {
        format!(
            "Chain verification FAILED\nRun:   {}\nError: {}\n",
            short(&run_id),
            verification.error_message()
        )
    };

    // Checkpoint the WAL so the copied database file is self-contained.
    repo.close().context("checkpointing database")?;
    let db_bytes = std::fs::read(db).with_context(|| format!("reading {}", db.display()))?;

    let file = File::create(output).with_context(|| format!("creating {}", output.display()))?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default();

    writer.start_file("vouch.db", options)?;
    writer.write_all(&db_bytes)?;

    writer.start_file("manifest.json", options)?;
    writer.write_all(serde_json::to_string_pretty(&manifest)?.as_bytes())?;

    writer.start_file("verification.txt", options)?;
    writer.write_all(report.as_bytes())?;

    writer.finish()?;

    println!("Evidence bag written to {}", output.display());
    println!(
        "Run {}: {} events, chain {}",
        short(&run_id),
        verification.events_checked,
        if verification.valid { "valid" } else { "INVALID" }
    );

    if !verification.valid {
        bail!("exported, but chain verification failed: {}", verification.error_message());
    }
    Ok(())
}
