//! Tamper detection against a real on-disk ledger.
//!
//! Events are appended through the processor, then individual columns are
//! rewritten with a second SQLite connection, the way an attacker with file
//! access would. Each mutation must surface as its specific chain error.

use std::sync::Arc;

use serde_json::json;
use vouch_core::crypto::LedgerSigner;
use vouch_core::event::{actor, event_type, Event};
use vouch_core::repo::{EventRepository, SqliteEventRepository};
use vouch_core::verify::{verify_chain, ChainError};
use vouch_daemon::processor::EventProcessor;

struct Ledger {
    repo: Arc<SqliteEventRepository>,
    db_path: std::path::PathBuf,
    run_id: String,
    _dir: tempfile::TempDir,
}

/// Builds a run with a genesis event and three signed tool calls.
fn build_ledger() -> Ledger {
    let dir = tempfile::TempDir::new().unwrap();
    let db_path = dir.path().join("vouch.db");

    let repo = Arc::new(SqliteEventRepository::open(&db_path).unwrap());
    let signer = Arc::new(LedgerSigner::load_or_generate(dir.path().join("key")).unwrap());
    let run_id = "1c1279e7-4a84-4c2f-9d6e-2f6f6f1b8a11".to_string();
    repo.insert_run(&run_id, "tamper-test-agent", "", &signer.public_key_hex())
        .unwrap();

    let processor = EventProcessor::new(
        Arc::clone(&repo) as Arc<dyn EventRepository>,
        Arc::clone(&signer),
    );

    let mut genesis = Event {
        id: Event::new_id(),
        actor: actor::SYSTEM.to_string(),
        event_type: event_type::GENESIS.to_string(),
        method: vouch_core::event::method::INIT.to_string(),
        ..Event::default()
    };
    processor.process(&mut genesis, &run_id).unwrap();

    for i in 0..3 {
        let mut event = Event {
            id: Event::new_id(),
            actor: actor::AGENT.to_string(),
            event_type: event_type::TOOL_CALL.to_string(),
            method: "os:read".to_string(),
            params: json!({"path": format!("/tmp/file-{i}")}),
            ..Event::default()
        };
        processor.process(&mut event, &run_id).unwrap();
    }

    let result = verify_chain(repo.as_ref(), &run_id).unwrap();
    assert!(result.valid, "fresh chain must verify: {}", result.error_message());

    Ledger {
        repo,
        db_path,
        run_id,
        _dir: dir,
    }
}

fn raw_exec(ledger: &Ledger, sql: &str) {
    let conn = rusqlite::Connection::open(&ledger.db_path).unwrap();
    conn.execute(sql, rusqlite::params![ledger.run_id]).unwrap();
}

#[test]
fn method_rewrite_reports_hash_mismatch() {
    let ledger = build_ledger();

    raw_exec(
        &ledger,
        "UPDATE events SET method = 'TAMPERED' WHERE seq_index = 1 AND run_id = ?1",
    );

    let result = verify_chain(ledger.repo.as_ref(), &ledger.run_id).unwrap();
    assert!(!result.valid);
    assert_eq!(result.error, Some(ChainError::HashMismatch { seq: 1 }));
    assert_eq!(result.at_seq(), Some(1));
}

#[test]
fn prev_hash_rewrite_reports_chain_tampered() {
    let ledger = build_ledger();

    raw_exec(
        &ledger,
        "UPDATE events SET prev_hash = 'WRONG_HASH' WHERE seq_index = 2 AND run_id = ?1",
    );

    let result = verify_chain(ledger.repo.as_ref(), &ledger.run_id).unwrap();
    assert!(!result.valid);
    assert_eq!(result.error, Some(ChainError::ChainTampered { seq: 2 }));
}

#[test]
fn signature_rewrite_reports_invalid_signature() {
    let ledger = build_ledger();

    raw_exec(
        &ledger,
        "UPDATE events SET signature = 'INVALID_SIG' WHERE seq_index = 1 AND run_id = ?1",
    );

    let result = verify_chain(ledger.repo.as_ref(), &ledger.run_id).unwrap();
    assert!(!result.valid);
    assert_eq!(result.error, Some(ChainError::InvalidSignature { seq: 1 }));
}

#[test]
fn deleting_an_event_reports_a_sequence_gap() {
    let ledger = build_ledger();

    raw_exec(
        &ledger,
        "DELETE FROM events WHERE seq_index = 1 AND run_id = ?1",
    );

    let result = verify_chain(ledger.repo.as_ref(), &ledger.run_id).unwrap();
    assert!(!result.valid);
    assert_eq!(
        result.error,
        Some(ChainError::SequenceGap {
            expected: 1,
            found: 2
        })
    );
}

#[test]
fn restoring_the_column_restores_validity() {
    let ledger = build_ledger();

    raw_exec(
        &ledger,
        "UPDATE events SET method = 'TAMPERED' WHERE seq_index = 1 AND run_id = ?1",
    );
    let tampered = verify_chain(ledger.repo.as_ref(), &ledger.run_id).unwrap();
    assert!(!tampered.valid);

    raw_exec(
        &ledger,
        "UPDATE events SET method = 'os:read' WHERE seq_index = 1 AND run_id = ?1",
    );
    let restored = verify_chain(ledger.repo.as_ref(), &ledger.run_id).unwrap();
    assert!(restored.valid, "{}", restored.error_message());
}

#[test]
fn unknown_run_reports_no_events() {
    let ledger = build_ledger();
    let result = verify_chain(ledger.repo.as_ref(), "no-such-run").unwrap();
    assert_eq!(result.error, Some(ChainError::NoEvents));
}
