//! Admin HTTP surface: rekey, stats, metrics.
//!
//! Served on its own listener, away from the proxied agent traffic. The
//! rekey endpoint is gated by `X-Admin-Token` against the `VOUCH_ADMIN_TOKEN`
//! environment variable when that variable is non-empty.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tracing::{error, info};

use crate::engine::{Engine, EngineStats};

/// Environment variable holding the admin token.
pub const ADMIN_TOKEN_ENV: &str = "VOUCH_ADMIN_TOKEN";

/// Header carrying the admin token.
pub const ADMIN_TOKEN_HEADER: &str = "X-Admin-Token";

/// Builds the admin router.
#[must_use]
pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/admin/rekey", post(rekey))
        .route("/admin/stats", get(stats))
        .route("/admin/metrics", get(metrics_text))
        .with_state(engine)
}

/// Rotates the signing key and begins a new run, so every run keeps a
/// single pinned public key for verification.
async fn rekey(State(engine): State<Arc<Engine>>, headers: HeaderMap) -> Response {
    let expected = std::env::var(ADMIN_TOKEN_ENV).unwrap_or_default();
    if !expected.is_empty() {
        let presented = headers
            .get(ADMIN_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if presented != expected {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }

    let (old_pub, new_pub) = match engine.worker().signer().rotate() {
        Ok(keys) => keys,
        Err(e) => {
            error!(error = %e, "key rotation failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, format!("rotation failed: {e}"))
                .into_response();
        },
    };

    match engine.worker().begin_new_run() {
        Ok(run_id) => {
            info!(run_id = %&run_id[..8.min(run_id.len())], "keys rotated, new run started");
            (
                StatusCode::OK,
                format!("Key rotated\nOld: {old_pub}\nNew: {new_pub}\n"),
            )
                .into_response()
        },
        Err(e) => {
            error!(error = %e, "failed to start post-rotation run");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("rotation applied but new run failed: {e}"),
            )
                .into_response()
        },
    }
}

/// JSON snapshot of pool, worker, and engine counters.
async fn stats(State(engine): State<Arc<Engine>>) -> Json<EngineStats> {
    Json(engine.stats())
}

/// Prometheus text exposition.
async fn metrics_text(State(engine): State<Arc<Engine>>) -> Response {
    match engine.metrics().encode_text() {
        Ok(body) => (
            StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4; charset=utf-8",
            )],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "metrics encoding failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics unavailable").into_response()
        },
    }
}
