//! SHA-256 chain hashing over canonical payloads.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::canonical::{canonicalize_value, CanonicalError};

/// Hashes one chain step: `SHA256(prev_hash_ascii ∥ canonical_bytes)`,
/// returned as lowercase hex.
#[must_use]
pub fn chain_hash(prev_hash: &str, canonical_payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(canonical_payload.as_bytes());
    hex::encode(hasher.finalize())
}

/// Canonicalizes `payload` per RFC 8785 and hashes it into the chain.
///
/// Deterministic across platforms and key orderings; this is the function
/// both the event processor and the verifier must agree on.
///
/// # Errors
///
/// Propagates [`CanonicalError`] from canonicalization.
pub fn calculate_event_hash(prev_hash: &str, payload: &Value) -> Result<String, CanonicalError> {
    let canonical = canonicalize_value(payload)?;
    Ok(chain_hash(prev_hash, &canonical))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::event::GENESIS_HASH;

    #[test]
    fn deterministic_for_equivalent_payloads() {
        let a = json!({"method": "aws:ec2:launch", "actor": "agent"});
        let b = json!({"actor": "agent", "method": "aws:ec2:launch"});

        let ha = calculate_event_hash(GENESIS_HASH, &a).unwrap();
        let hb = calculate_event_hash(GENESIS_HASH, &b).unwrap();
        assert_eq!(ha, hb);
    }

    #[test]
    fn output_is_64_lowercase_hex() {
        let hash = calculate_event_hash(GENESIS_HASH, &json!({"k": "v"})).unwrap();
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn prev_hash_feeds_the_digest() {
        let payload = json!({"k": "v"});
        let h1 = calculate_event_hash(GENESIS_HASH, &payload).unwrap();
        let h2 = calculate_event_hash(&h1, &payload).unwrap();
        assert_ne!(h1, h2);
    }

    #[test]
    fn payload_changes_change_the_hash() {
        let h1 = calculate_event_hash(GENESIS_HASH, &json!({"method": "os:read"})).unwrap();
        let h2 = calculate_event_hash(GENESIS_HASH, &json!({"method": "os:write"})).unwrap();
        assert_ne!(h1, h2);
    }
}
