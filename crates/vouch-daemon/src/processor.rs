//! The event processor: the only place chain state is mutated.
//!
//! For each event the processor assigns the next sequence index, links the
//! previous hash, normalizes the timestamp, canonicalizes the fifteen-field
//! payload, hashes, signs, and stores. Sequence and prev-hash acquisition
//! must be serialized per run; the worker's single consumer guarantees that.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;
use vouch_core::canonical::CanonicalError;
use vouch_core::crypto::{calculate_event_hash, LedgerSigner};
use vouch_core::event::{Event, GENESIS_HASH};
use vouch_core::invariant::{self, InvariantViolation};
use vouch_core::repo::{EventRepository, RepoError};

/// Errors finalizing an event.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The repository rejected a read or the append.
    #[error("repository: {0}")]
    Repo(#[from] RepoError),

    /// The payload could not be canonicalized.
    #[error("canonicalizing payload: {0}")]
    Canonical(#[from] CanonicalError),

    /// A chain-state precondition failed.
    #[error(transparent)]
    Integrity(#[from] InvariantViolation),
}

/// Finalizes events onto the chain of one run.
pub struct EventProcessor {
    repo: Arc<dyn EventRepository>,
    signer: Arc<LedgerSigner>,
}

impl EventProcessor {
    /// Creates a processor writing through `repo` and signing with `signer`.
    #[must_use]
    pub fn new(repo: Arc<dyn EventRepository>, signer: Arc<LedgerSigner>) -> Self {
        Self { repo, signer }
    }

    /// Assigns chain position, hashes, signs, and stores one event.
    ///
    /// Not safe to call concurrently for the same run: sequence and
    /// prev-hash acquisition assume a single caller.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError`] on repository, canonicalization, or
    /// integrity failure. The event is not stored on error.
    pub fn process(&self, event: &mut Event, run_id: &str) -> Result<(), ProcessError> {
        event.run_id = run_id.to_string();

        let (seq_index, prev_hash) = match self.repo.last_event(run_id)? {
            None => (0, GENESIS_HASH.to_string()),
            Some((last_seq, last_hash)) => {
                invariant::check(
                    !last_hash.is_empty(),
                    "prev_hash must be non-empty for non-genesis events",
                )?;
                (last_seq + 1, last_hash)
            },
        };
        event.seq_index = seq_index;
        event.prev_hash = prev_hash;

        invariant::check(event.prev_hash.len() == 64, "prev_hash must be 64 hex chars")?;

        let timestamp = event.timestamp_rfc3339();
        let payload = event.canonical_payload(&timestamp);

        event.current_hash = calculate_event_hash(&event.prev_hash, &payload)?;
        event.signature = self.signer.sign_hash(&event.current_hash);

        self.repo.store_event(event)?;

        debug!(
            event_id = %event.id,
            seq = event.seq_index,
            method = %event.method,
            "event persisted"
        );
        Ok(())
    }
}
