//! `vouch rekey` - rotate the daemon's signing keys.

use anyhow::{bail, Context, Result};

/// Environment variable holding the admin token, mirrored from the daemon.
const ADMIN_TOKEN_ENV: &str = "VOUCH_ADMIN_TOKEN";

pub fn run(admin_url: &str) -> Result<()> {
    let url = format!("{}/admin/rekey", admin_url.trim_end_matches('/'));

    let client = reqwest::blocking::Client::new();
    let mut request = client.post(&url);
    if let Ok(token) = std::env::var(ADMIN_TOKEN_ENV) {
        if !token.is_empty() {
            request = request.header("X-Admin-Token", token);
        }
    }

    let response = request
        .send()
        .with_context(|| format!("reaching daemon at {url}"))?;

    let status = response.status();
    let text = response.text().unwrap_or_default();

    if !status.is_success() {
        bail!("rekey failed ({status}): {text}");
    }
    println!("{text}");
    Ok(())
}
