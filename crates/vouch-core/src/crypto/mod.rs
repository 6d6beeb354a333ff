//! Cryptographic primitives for the Vouch ledger.
//!
//! Two concerns live here:
//!
//! - **Chain hashing**: each event's hash covers the previous event's hash
//!   plus the RFC 8785 canonical encoding of its payload, so any change to a
//!   historical event breaks every hash after it.
//! - **Ed25519 signatures**: the ledger key signs the ASCII hex of each event
//!   hash. The public key is pinned into the run record at genesis, so
//!   rotation starts a new run rather than invalidating old ones.

mod hash;
mod signer;

pub use hash::{calculate_event_hash, chain_hash};
pub use signer::{verify_with_key, LedgerSigner, SignerError};
