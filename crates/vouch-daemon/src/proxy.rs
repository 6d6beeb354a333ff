//! The intercepting reverse proxy.
//!
//! Pass-through semantics: bodies are buffered, inspected, and forwarded
//! unchanged; the only side effects are ledger events. A request that is not
//! POST, or whose body is not JSON-RPC, forwards with no event. The request
//! path never waits on ledger durability.

use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, warn};
use vouch_core::event::{actor, event_type, task_state, Event};

use crate::engine::Engine;

/// A JSON-RPC (MCP-style) request envelope.
#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[serde(default)]
    jsonrpc: String,
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

/// A JSON-RPC response envelope. Only bodies carrying `result` or `error`
/// are treated as tool responses.
#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<serde_json::Map<String, Value>>,
    #[serde(default)]
    error: Option<Value>,
}

/// Shared proxy state: the engine plus the upstream HTTP client.
pub struct ProxyState {
    engine: Arc<Engine>,
    client: reqwest::Client,
    upstream: String,
}

impl ProxyState {
    /// Creates proxy state forwarding to `upstream` (scheme + authority,
    /// e.g. `http://127.0.0.1:8080`).
    #[must_use]
    pub fn new(engine: Arc<Engine>, upstream: impl Into<String>) -> Self {
        Self {
            engine,
            client: reqwest::Client::new(),
            upstream: upstream.into().trim_end_matches('/').to_string(),
        }
    }

    /// Builds the proxy router: every method and path falls through to the
    /// forwarding handler.
    #[must_use]
    pub fn router(state: Arc<Self>) -> Router {
        Router::new().fallback(forward).with_state(state)
    }

    /// Request hook: classify and emit `blocked`/`tool_call` events.
    fn on_request(&self, body: &[u8]) {
        let Ok(rpc) = serde_json::from_slice::<JsonRpcRequest>(body) else {
            return;
        };
        if rpc.method.is_empty() {
            return;
        }
        debug!(method = %rpc.method, rpc_id = ?rpc.id, version = %rpc.jsonrpc, "intercepted call");

        let classification = self.engine.policy().classify(&rpc.method, &rpc.params);
        let (policy_id, risk_level) = match classification.matched_rule {
            Some(rule) => (rule.id.clone(), rule.risk_level.clone()),
            None => (String::new(), classification.risk_level.to_string()),
        };

        if classification.should_stall {
            // Stall is observational in the async pipeline: record the
            // Proof-of-Refusal and let the call proceed.
            warn!(
                method = %rpc.method,
                policy = %policy_id,
                risk = %risk_level,
                "STALL matched, recording Proof-of-Refusal"
            );

            let mut blocked = self.engine.pool().acquire();
            blocked.id = Event::new_id();
            blocked.timestamp = chrono::Utc::now();
            blocked.actor = actor::AGENT.to_string();
            blocked.event_type = event_type::BLOCKED.to_string();
            blocked.method = rpc.method.clone();
            blocked.params = rpc.params.clone();
            blocked.policy_id = policy_id.clone();
            blocked.risk_level = risk_level.clone();
            blocked.was_blocked = true;
            self.engine.submit(blocked);
        }

        let task_id = rpc
            .params
            .get("task_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let (state, parent_id) = if task_id.is_empty() {
            (String::new(), String::new())
        } else {
            (
                task_state::WORKING.to_string(),
                self.engine.last_event_for_task(&task_id).unwrap_or_default(),
            )
        };

        let mut event = self.engine.pool().acquire();
        event.id = Event::new_id();
        event.timestamp = chrono::Utc::now();
        event.actor = actor::AGENT.to_string();
        event.event_type = event_type::TOOL_CALL.to_string();
        event.method = rpc.method;
        event.params = rpc.params;
        event.task_id = task_id;
        event.task_state = state;
        event.parent_id = parent_id;
        event.policy_id = policy_id;
        event.risk_level = risk_level;
        self.engine.submit(event);
    }

    /// Response hook: emit a `tool_response` event carrying the result.
    fn on_response(&self, body: &[u8]) {
        let Ok(rpc) = serde_json::from_slice::<JsonRpcResponse>(body) else {
            return;
        };
        if rpc.result.is_none() && rpc.error.is_none() {
            return;
        }

        let result = rpc.result.map(Value::Object).unwrap_or(Value::Null);
        let task_id = result
            .get("task_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let state = result
            .get("state")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let parent_id = if task_id.is_empty() {
            String::new()
        } else {
            self.engine.last_event_for_task(&task_id).unwrap_or_default()
        };

        let mut event = self.engine.pool().acquire();
        event.id = Event::new_id();
        event.timestamp = chrono::Utc::now();
        event.actor = actor::AGENT.to_string();
        event.event_type = event_type::TOOL_RESPONSE.to_string();
        event.response = result;
        event.task_id = task_id;
        event.task_state = state;
        event.parent_id = parent_id;
        self.engine.submit(event);
    }
}

/// Forwards one request to the upstream, emitting hook events around it.
async fn forward(State(state): State<Arc<ProxyState>>, req: Request) -> Response {
    let (parts, body) = req.into_parts();

    let body_bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(error = %e, "failed to read request body");
            return (StatusCode::BAD_REQUEST, "unreadable body").into_response();
        },
    };

    if parts.method == Method::POST {
        state.on_request(&body_bytes);
    }

    let path_and_query = parts.uri.path_and_query().map_or("/", |pq| pq.as_str());
    let url = format!("{}{}", state.upstream, path_and_query);

    let mut headers = parts.headers.clone();
    headers.remove(header::HOST);

    let upstream_result = state
        .client
        .request(parts.method.clone(), &url)
        .headers(headers)
        .body(body_bytes.to_vec())
        .send()
        .await;

    let upstream_response = match upstream_result {
        Ok(response) => response,
        Err(e) => {
            error!(url = %url, error = %e, "upstream request failed");
            return (StatusCode::BAD_GATEWAY, "upstream unreachable").into_response();
        },
    };

    let status = upstream_response.status();
    let mut response_headers = upstream_response.headers().clone();
    response_headers.remove(header::TRANSFER_ENCODING);
    response_headers.remove(header::CONNECTION);

    let response_bytes: Bytes = match upstream_response.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!(error = %e, "failed to read upstream response body");
            return (StatusCode::BAD_GATEWAY, "unreadable upstream body").into_response();
        },
    };

    state.on_response(&response_bytes);

    let mut builder = Response::builder().status(status);
    if let Some(header_map) = builder.headers_mut() {
        *header_map = response_headers;
    }
    builder
        .body(Body::from(response_bytes))
        .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
}
