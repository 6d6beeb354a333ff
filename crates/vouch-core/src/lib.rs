//! Core primitives for the Vouch forensic ledger.
//!
//! Vouch records every tool call an autonomous agent makes as a signed,
//! hash-chained event. This crate holds everything the daemon and the CLI
//! share:
//!
//! - [`canonical`]: RFC 8785 (JCS) canonical JSON encoding
//! - [`crypto`]: SHA-256 chain hashing and Ed25519 signing
//! - [`event`]: the event record, run metadata, and statistics types
//! - [`ring`]: the bounded ring buffer between the proxy and the worker
//! - [`policy`]: declarative method/risk classification rules
//! - [`repo`]: the `EventRepository` capability trait and its SQLite backend
//! - [`verify`]: the offline chain verifier
//! - [`invariant`]: structured runtime invariant checks
//!
//! The crate performs no I/O beyond the key file and the SQLite database and
//! has no async surface; the daemon owns scheduling.

pub mod canonical;
pub mod crypto;
pub mod event;
pub mod invariant;
pub mod policy;
pub mod repo;
pub mod ring;
pub mod verify;

pub use event::{Event, GlobalStats, RunInfo, RunStats, GENESIS_HASH};
pub use repo::{EventRepository, RepoError, SqliteEventRepository};
pub use verify::{verify_chain, ChainError, ChainVerification};
