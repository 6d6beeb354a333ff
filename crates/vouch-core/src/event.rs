//! The event record and run metadata types.
//!
//! An [`Event`] is the atomic ledger record. Fifteen fields form the signed
//! payload (identity, context, causality, policy); the three integrity
//! fields (`prev_hash`, `current_hash`, `signature`) are filled in by the
//! event processor and excluded from the payload they authenticate.

use std::collections::HashMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// The `prev_hash` of every genesis event: 64 hex zeros.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Well-known actor values.
pub mod actor {
    /// Events synthesized by Vouch itself (genesis, task terminals).
    pub const SYSTEM: &str = "system";
    /// Events originating from intercepted agent traffic.
    pub const AGENT: &str = "agent";
}

/// Well-known event types.
pub mod event_type {
    /// First event of a run; anchors the chain.
    pub const GENESIS: &str = "genesis";
    /// An intercepted JSON-RPC request.
    pub const TOOL_CALL: &str = "tool_call";
    /// An intercepted JSON-RPC response.
    pub const TOOL_RESPONSE: &str = "tool_response";
    /// A Proof-of-Refusal record for a stall-matched call.
    pub const BLOCKED: &str = "blocked";
    /// Synthesized when a task reaches a terminal state.
    pub const TASK_TERMINAL: &str = "task_terminal";
}

/// Well-known task states.
pub mod task_state {
    /// Default state for a task observed on a request.
    pub const WORKING: &str = "working";
    /// Terminal states; reaching one synthesizes a `task_terminal` event.
    pub const TERMINAL: [&str; 3] = ["completed", "failed", "cancelled"];

    /// Returns `true` for `completed`, `failed`, or `cancelled`.
    #[must_use]
    pub fn is_terminal(state: &str) -> bool {
        TERMINAL.contains(&state)
    }
}

/// Methods Vouch stamps onto self-authored events.
pub mod method {
    /// Genesis event method.
    pub const INIT: &str = "vouch:init";
    /// Task terminal event method.
    pub const TASK_STATE: &str = "vouch:task_state";
}

/// One ledger record.
///
/// `task_id`, `parent_id`, `policy_id`, and `risk_level` use the empty
/// string for "absent", matching the storage schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// 8-character UUID prefix, unique within the run.
    pub id: String,
    /// Run this event belongs to.
    pub run_id: String,
    /// Position in the run's chain; 0 is genesis.
    pub seq_index: u64,
    /// Capture time; normalized to RFC 3339 nanoseconds when hashed.
    pub timestamp: DateTime<Utc>,
    /// `"system"` or `"agent"`.
    pub actor: String,
    /// One of the [`event_type`] values.
    pub event_type: String,
    /// Dotted/colon-delimited operation identifier, e.g. `aws:ec2:launch`.
    pub method: String,
    /// JSON-RPC request params (null when absent).
    pub params: Value,
    /// JSON-RPC response result (null when absent).
    pub response: Value,
    /// Causal task correlation id.
    pub task_id: String,
    /// Task state observed with this event.
    pub task_state: String,
    /// Id of the causally preceding event within the same run.
    pub parent_id: String,
    /// Id of the policy rule that matched, if any.
    pub policy_id: String,
    /// `low`, `medium`, `high`, or `critical`.
    pub risk_level: String,
    /// True when a stall rule matched this call.
    pub was_blocked: bool,

    /// Hash of the previous event (64 hex), or [`GENESIS_HASH`] at seq 0.
    pub prev_hash: String,
    /// `SHA256(prev_hash ∥ canonical_payload)` as 64 hex.
    pub current_hash: String,
    /// Ed25519 signature over the ASCII `current_hash` (128 hex).
    pub signature: String,
}

impl Default for Event {
    fn default() -> Self {
        Self {
            id: String::new(),
            run_id: String::new(),
            seq_index: 0,
            timestamp: Utc::now(),
            actor: String::new(),
            event_type: String::new(),
            method: String::new(),
            params: Value::Null,
            response: Value::Null,
            task_id: String::new(),
            task_state: String::new(),
            parent_id: String::new(),
            policy_id: String::new(),
            risk_level: String::new(),
            was_blocked: false,
            prev_hash: String::new(),
            current_hash: String::new(),
            signature: String::new(),
        }
    }
}

impl Event {
    /// Formats the capture time the way it is hashed and stored: RFC 3339
    /// with nanosecond precision and a `Z` suffix.
    #[must_use]
    pub fn timestamp_rfc3339(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Nanos, true)
    }

    /// Projects the fifteen payload fields into the JSON object that gets
    /// canonicalized and hashed. An explicit field list, never reflection:
    /// adding a field here is a chain-format change.
    ///
    /// `timestamp` is passed in pre-formatted so the processor and the
    /// verifier hash the identical string the store carries.
    #[must_use]
    pub fn canonical_payload(&self, timestamp: &str) -> Value {
        json!({
            "id": self.id,
            "run_id": self.run_id,
            "seq_index": self.seq_index,
            "timestamp": timestamp,
            "actor": self.actor,
            "event_type": self.event_type,
            "method": self.method,
            "params": self.params,
            "response": self.response,
            "task_id": self.task_id,
            "task_state": self.task_state,
            "parent_id": self.parent_id,
            "policy_id": self.policy_id,
            "risk_level": self.risk_level,
            "was_blocked": self.was_blocked,
        })
    }

    /// Clears all fields for reuse from a pool.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Generates an event id: the first 8 characters of a UUIDv4.
    #[must_use]
    pub fn new_id() -> String {
        uuid::Uuid::new_v4().to_string()[..8].to_string()
    }
}

/// One ledger epoch. Immutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInfo {
    /// UUIDv4 identifying the run.
    pub run_id: String,
    /// Name of the observed agent.
    pub agent_name: String,
    /// Creation time, RFC 3339.
    pub started_at: String,
    /// `current_hash` of the run's genesis event.
    pub genesis_hash: String,
    /// Hex Ed25519 public key active at run creation.
    pub ledger_pub_key: String,
}

/// Aggregate statistics for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunStats {
    /// Number of events in the run.
    pub total_events: u64,
    /// Number of events with `was_blocked` set.
    pub blocked_count: u64,
    /// Event count per risk level.
    pub risk_breakdown: HashMap<String, u64>,
}

/// Statistics across all runs in the store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalStats {
    /// Number of runs recorded.
    pub total_runs: u64,
    /// Number of events across all runs.
    pub total_events: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_payload_excludes_integrity_fields() {
        let event = Event {
            id: "abc12345".to_string(),
            prev_hash: GENESIS_HASH.to_string(),
            current_hash: "ff".repeat(32),
            signature: "aa".repeat(64),
            ..Event::default()
        };

        let payload = event.canonical_payload(&event.timestamp_rfc3339());
        let obj = payload.as_object().unwrap();

        assert_eq!(obj.len(), 15);
        assert!(!obj.contains_key("prev_hash"));
        assert!(!obj.contains_key("current_hash"));
        assert!(!obj.contains_key("signature"));
    }

    #[test]
    fn timestamp_formatting_round_trips() {
        let event = Event::default();
        let formatted = event.timestamp_rfc3339();

        let parsed: DateTime<Utc> = formatted.parse().unwrap();
        let reformatted = parsed.to_rfc3339_opts(SecondsFormat::Nanos, true);
        assert_eq!(formatted, reformatted);
    }

    #[test]
    fn new_id_is_an_8_char_prefix() {
        let id = Event::new_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() || c == '-'));
    }

    #[test]
    fn terminal_states() {
        assert!(task_state::is_terminal("completed"));
        assert!(task_state::is_terminal("failed"));
        assert!(task_state::is_terminal("cancelled"));
        assert!(!task_state::is_terminal("working"));
        assert!(!task_state::is_terminal(""));
    }
}
