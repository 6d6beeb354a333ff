//! End-to-end pipeline tests: a mock upstream, the real proxy in front of
//! it, and the full intercept → classify → enqueue → persist → verify path.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;
use axum::{Json, Router};
use serde_json::{json, Value};
use vouch_core::crypto::LedgerSigner;
use vouch_core::event::event_type;
use vouch_core::policy::PolicyEngine;
use vouch_core::repo::{EventRepository, SqliteEventRepository};
use vouch_core::verify::verify_chain;
use vouch_daemon::engine::Engine;
use vouch_daemon::metrics::DaemonMetrics;
use vouch_daemon::pool::EventPool;
use vouch_daemon::proxy::ProxyState;
use vouch_daemon::worker::LedgerWorker;

const POLICY: &str = r#"
version: "2026.1"
defaults:
  retention_days: 30
  signing_enabled: true
  log_level: info
policies:
  - id: critical-infra
    match_methods: ["aws:ec2:launch"]
    risk_level: critical
  - id: payments
    match_methods: ["stripe:*"]
    risk_level: high
    action: stall
    proof_of_refusal: true
    conditions:
      amount_gt: 1000
"#;

/// Mock tool backend: answers every JSON-RPC call with `success: true`,
/// echoing `task_id` and `state` from the request params into the result.
async fn mock_upstream_handler(req: Request) -> Json<Value> {
    let body = axum::body::to_bytes(req.into_body(), usize::MAX)
        .await
        .unwrap_or_default();
    let rpc: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);

    let mut result = serde_json::Map::new();
    result.insert("success".to_string(), json!(true));
    if let Some(task_id) = rpc.pointer("/params/task_id").and_then(Value::as_str) {
        result.insert("task_id".to_string(), json!(task_id));
        let state = rpc
            .pointer("/params/state")
            .and_then(Value::as_str)
            .unwrap_or("working");
        result.insert("state".to_string(), json!(state));
    }

    Json(json!({
        "jsonrpc": "2.0",
        "id": rpc.get("id").cloned().unwrap_or(Value::Null),
        "result": Value::Object(result),
    }))
}

struct Stack {
    proxy_addr: SocketAddr,
    engine: Arc<Engine>,
    repo: Arc<SqliteEventRepository>,
    worker_handle: tokio::task::JoinHandle<()>,
    _dir: tempfile::TempDir,
}

async fn start_stack() -> Stack {
    let upstream_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = upstream_listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            upstream_listener,
            Router::new().fallback(mock_upstream_handler),
        )
        .await
        .unwrap();
    });

    let dir = tempfile::TempDir::new().unwrap();
    let repo = Arc::new(SqliteEventRepository::open(dir.path().join("vouch.db")).unwrap());
    let signer = Arc::new(LedgerSigner::load_or_generate(dir.path().join("key")).unwrap());
    let metrics = Arc::new(DaemonMetrics::new().unwrap());
    let pool = Arc::new(EventPool::new(64, Arc::clone(&metrics)));
    let worker = Arc::new(
        LedgerWorker::new(
            Arc::clone(&repo) as Arc<dyn EventRepository>,
            signer,
            Arc::clone(&pool),
            Arc::clone(&metrics),
            1000,
            "e2e-agent",
        )
        .unwrap(),
    );
    let worker_handle = worker.start().unwrap();
    let engine = Arc::new(Engine::new(
        worker,
        PolicyEngine::from_str(POLICY).unwrap(),
        pool,
        metrics,
    ));

    let proxy_state = Arc::new(ProxyState::new(
        Arc::clone(&engine),
        format!("http://{upstream_addr}"),
    ));
    let proxy_listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy_addr = proxy_listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(proxy_listener, ProxyState::router(proxy_state))
            .await
            .unwrap();
    });

    Stack {
        proxy_addr,
        engine,
        repo,
        worker_handle,
        _dir: dir,
    }
}

impl Stack {
    async fn rpc(&self, body: Value) -> Value {
        let client = reqwest::Client::new();
        let response = client
            .post(format!("http://{}/rpc", self.proxy_addr))
            .json(&body)
            .send()
            .await
            .expect("proxy must be reachable");
        assert!(response.status().is_success());
        response.json().await.expect("upstream reply must be JSON")
    }

    /// Waits (bounded) until the worker has persisted `count` events.
    async fn wait_for_events(&self, count: u64) {
        for _ in 0..200 {
            let (processed, _) = self.engine.worker().stats();
            if processed >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for {count} persisted events");
    }

    async fn shutdown(self) -> (Arc<SqliteEventRepository>, String) {
        let run_id = self.engine.worker().run_id();
        self.engine.worker().close();
        self.worker_handle.await.unwrap();
        (self.repo, run_id)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn passive_critical_capture() {
    let stack = start_stack().await;

    let reply = stack
        .rpc(json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "aws:ec2:launch",
            "params": {"type": "t2.micro"}
        }))
        .await;
    assert_eq!(reply.pointer("/result/success"), Some(&json!(true)));

    // genesis + tool_call + tool_response
    stack.wait_for_events(3).await;
    let (repo, run_id) = stack.shutdown().await;

    let risky = repo.risk_events().unwrap();
    assert_eq!(risky.len(), 1);
    assert_eq!(risky[0].method, "aws:ec2:launch");
    assert_eq!(risky[0].risk_level, "critical");

    let result = verify_chain(repo.as_ref(), &run_id).unwrap();
    assert!(result.valid, "{}", result.error_message());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stall_is_recorded_but_the_call_proceeds() {
    let stack = start_stack().await;

    let reply = stack
        .rpc(json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "stripe:refund",
            "params": {"amount": 5000}
        }))
        .await;
    // The upstream still receives and answers the stalled call.
    assert_eq!(reply.pointer("/result/success"), Some(&json!(true)));

    // genesis + blocked + tool_call + tool_response
    stack.wait_for_events(4).await;
    let (repo, run_id) = stack.shutdown().await;

    let events = repo.all_events(&run_id).unwrap();
    let blocked: Vec<_> = events
        .iter()
        .filter(|e| e.event_type == event_type::BLOCKED)
        .collect();
    assert_eq!(blocked.len(), 1);
    assert!(blocked[0].was_blocked);
    assert_eq!(blocked[0].policy_id, "payments");

    let responses: Vec<_> = events
        .iter()
        .filter(|e| e.event_type == event_type::TOOL_RESPONSE)
        .collect();
    assert_eq!(responses.len(), 1);
    assert!(responses[0].seq_index > blocked[0].seq_index);

    let result = verify_chain(repo.as_ref(), &run_id).unwrap();
    assert!(result.valid, "{}", result.error_message());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn non_rpc_traffic_passes_through_unrecorded() {
    let stack = start_stack().await;

    let client = reqwest::Client::new();
    let response = client
        .get(format!("http://{}/healthz", stack.proxy_addr))
        .send()
        .await
        .unwrap();
    assert!(response.status().is_success());

    // Non-POST traffic emits no tool_call. The mock answers GETs with a
    // JSON-RPC body, so a tool_response may still be recorded; that is the
    // response-hook contract.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let (repo, run_id) = stack.shutdown().await;
    let events = repo.all_events(&run_id).unwrap();
    assert!(events
        .iter()
        .all(|e| e.event_type != event_type::TOOL_CALL));
    assert_eq!(events[0].event_type, event_type::GENESIS);

    let result = verify_chain(repo.as_ref(), &run_id).unwrap();
    assert!(result.valid, "{}", result.error_message());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn task_timeline_reconstructs_as_a_single_chain() {
    let stack = start_stack().await;

    stack
        .rpc(json!({
            "jsonrpc": "2.0", "id": 1, "method": "job:start",
            "params": {"task_id": "task-42"}
        }))
        .await;
    stack
        .rpc(json!({
            "jsonrpc": "2.0", "id": 2, "method": "job:poll",
            "params": {"task_id": "task-42"}
        }))
        .await;

    // genesis + 2 calls + 2 responses
    stack.wait_for_events(5).await;
    let (repo, _run_id) = stack.shutdown().await;

    let events = repo.events_by_task("task-42").unwrap();
    assert!(events.len() >= 4);

    // Ordered by seq_index, rooted at the first call, each subsequent
    // event parented on its predecessor.
    let seqs: Vec<u64> = events.iter().map(|e| e.seq_index).collect();
    let mut sorted = seqs.clone();
    sorted.sort_unstable();
    assert_eq!(seqs, sorted);

    let roots: Vec<_> = events.iter().filter(|e| e.parent_id.is_empty()).collect();
    assert_eq!(roots.len(), 1);
    assert_eq!(roots[0].event_type, event_type::TOOL_CALL);
    for pair in events.windows(2) {
        assert_eq!(pair[1].parent_id, pair[0].id);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn terminal_task_state_synthesizes_a_terminal_event() {
    let stack = start_stack().await;

    stack
        .rpc(json!({
            "jsonrpc": "2.0", "id": 1, "method": "job:start",
            "params": {"task_id": "task-d"}
        }))
        .await;
    stack
        .rpc(json!({
            "jsonrpc": "2.0", "id": 2, "method": "job:finish",
            "params": {"task_id": "task-d", "state": "completed"}
        }))
        .await;

    // genesis + 2 calls + 2 responses + task_terminal
    stack.wait_for_events(6).await;
    let (repo, run_id) = stack.shutdown().await;

    let events = repo.events_by_task("task-d").unwrap();
    let terminal: Vec<_> = events
        .iter()
        .filter(|e| e.event_type == event_type::TASK_TERMINAL)
        .collect();
    assert_eq!(terminal.len(), 1);
    assert_eq!(terminal[0].method, "vouch:task_state");
    assert_eq!(terminal[0].task_state, "completed");

    let result = verify_chain(repo.as_ref(), &run_id).unwrap();
    assert!(result.valid, "{}", result.error_message());
}
