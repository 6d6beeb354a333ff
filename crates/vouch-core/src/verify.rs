//! Offline chain verification.
//!
//! The verifier walks a run's events in sequence order and proves, without
//! trusting the daemon, that nothing was altered, reordered, or deleted:
//! sequence contiguity, linkage (`prev_hash[k] == current_hash[k-1]`), hash
//! recomputation over the canonical payload, and the Ed25519 signature
//! against the public key pinned in the run record.
//!
//! Linkage is checked before hash recomputation so a rewritten `prev_hash`
//! reports as tampered linkage rather than as a generic hash mismatch.

use thiserror::Error;

use crate::crypto::{calculate_event_hash, verify_with_key};
use crate::event::{Event, GENESIS_HASH};
use crate::repo::{EventRepository, RepoError};

/// Integrity failures. Raised only here; never recovered, surfaced to the
/// operator as a failed run.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// The run exists but holds no events.
    #[error("audit trail is empty: no events found for run")]
    NoEvents,

    /// `seq_index` is not contiguous from zero.
    #[error("ledger sequence gap detected: expected seq {expected}, found {found}")]
    SequenceGap {
        /// The expected index at this position.
        expected: u64,
        /// The index actually stored.
        found: u64,
    },

    /// An event's `prev_hash` does not equal its predecessor's
    /// `current_hash` (or the genesis constant at seq 0).
    #[error("cryptographic chain linkage tampered: hash mismatch at seq {seq}")]
    ChainTampered {
        /// Sequence index of the broken link.
        seq: u64,
    },

    /// Recomputing an event's hash does not reproduce `current_hash`.
    #[error("event hash corrupted: data does not match stored hash at seq {seq}")]
    HashMismatch {
        /// Sequence index of the corrupted event.
        seq: u64,
    },

    /// The stored signature does not verify over `current_hash`.
    #[error("cryptographic signature invalid: authenticity unverified at seq {seq}")]
    InvalidSignature {
        /// Sequence index of the unverifiable event.
        seq: u64,
    },
}

/// Outcome of verifying one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainVerification {
    /// True when every check passed.
    pub valid: bool,
    /// The first failure, if any.
    pub error: Option<ChainError>,
    /// Number of events checked.
    pub events_checked: u64,
}

impl ChainVerification {
    fn ok(events_checked: u64) -> Self {
        Self {
            valid: true,
            error: None,
            events_checked,
        }
    }

    fn failed(error: ChainError, events_checked: u64) -> Self {
        Self {
            valid: false,
            error: Some(error),
            events_checked,
        }
    }

    /// Renders the failure for operator output; empty when valid.
    #[must_use]
    pub fn error_message(&self) -> String {
        self.error
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_default()
    }

    /// Sequence index of the first failure, when one names an event.
    #[must_use]
    pub fn at_seq(&self) -> Option<u64> {
        match self.error {
            Some(
                ChainError::SequenceGap { found: seq, .. }
                | ChainError::ChainTampered { seq }
                | ChainError::HashMismatch { seq }
                | ChainError::InvalidSignature { seq },
            ) => Some(seq),
            _ => None,
        }
    }
}

/// Verifies a stored run end to end.
///
/// Chain failures are reported inside the returned [`ChainVerification`];
/// the `Err` path is reserved for the repository itself failing.
///
/// # Errors
///
/// Returns [`RepoError`] when events or the run record cannot be loaded.
pub fn verify_chain(
    repo: &dyn EventRepository,
    run_id: &str,
) -> Result<ChainVerification, RepoError> {
    let events = repo.all_events(run_id)?;
    let pub_key = repo
        .run_info(run_id)?
        .map(|info| info.ledger_pub_key)
        .unwrap_or_default();
    Ok(verify_events(&events, &pub_key))
}

/// Verifies an ordered slice of events against a run public key.
#[must_use]
pub fn verify_events(events: &[Event], pub_key_hex: &str) -> ChainVerification {
    if events.is_empty() {
        return ChainVerification::failed(ChainError::NoEvents, 0);
    }

    for (i, event) in events.iter().enumerate() {
        let expected_seq = i as u64;
        let checked = expected_seq;

        if event.seq_index != expected_seq {
            return ChainVerification::failed(
                ChainError::SequenceGap {
                    expected: expected_seq,
                    found: event.seq_index,
                },
                checked,
            );
        }

        let expected_prev = if i == 0 {
            GENESIS_HASH
        } else {
            events[i - 1].current_hash.as_str()
        };
        if event.prev_hash != expected_prev {
            return ChainVerification::failed(
                ChainError::ChainTampered {
                    seq: event.seq_index,
                },
                checked,
            );
        }

        let payload = event.canonical_payload(&event.timestamp_rfc3339());
        let recomputed = match calculate_event_hash(&event.prev_hash, &payload) {
            Ok(hash) => hash,
            Err(_) => {
                return ChainVerification::failed(
                    ChainError::HashMismatch {
                        seq: event.seq_index,
                    },
                    checked,
                );
            },
        };
        if recomputed != event.current_hash {
            return ChainVerification::failed(
                ChainError::HashMismatch {
                    seq: event.seq_index,
                },
                checked,
            );
        }

        if !verify_with_key(pub_key_hex, &event.current_hash, &event.signature) {
            return ChainVerification::failed(
                ChainError::InvalidSignature {
                    seq: event.seq_index,
                },
                checked,
            );
        }
    }

    ChainVerification::ok(events.len() as u64)
}
