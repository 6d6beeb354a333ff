//! `vouch replay` - re-execute a recorded tool call.
//!
//! The replay is sent back through the proxy, so the reproduction itself is
//! ledgered as a fresh event.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde_json::json;
use vouch_core::event::event_type;
use vouch_core::repo::EventRepository;

use super::{open_repo, short};

pub fn run(db: &Path, proxy_url: &str, event_id: &str) -> Result<()> {
    let repo = open_repo(db)?;

    let Some(event) = repo.event_by_id(event_id)? else {
        bail!("no event with id {event_id}");
    };
    if event.event_type != event_type::TOOL_CALL && event.event_type != event_type::BLOCKED {
        bail!(
            "event {} is a {}, only tool calls can be replayed",
            short(&event.id),
            event.event_type
        );
    }

    println!("Replaying {} ({})", event.method, short(&event.id));

    let body = json!({
        "jsonrpc": "2.0",
        "id": format!("replay-{}", event.id),
        "method": event.method,
        "params": event.params,
    });

    let client = reqwest::blocking::Client::new();
    let response = client
        .post(format!("{}/rpc", proxy_url.trim_end_matches('/')))
        .json(&body)
        .send()
        .with_context(|| format!("sending replay through {proxy_url}"))?;

    let status = response.status();
    let text = response.text().unwrap_or_default();
    println!("Status: {status}");
    println!("{text}");

    if !status.is_success() {
        bail!("replay returned {status}");
    }
    Ok(())
}
