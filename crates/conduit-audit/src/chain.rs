//! Hash-chain primitives.
//!
//! Hash input layout (bytes, in order):
//!   1. log_id as UTF-8 bytes
//!   2. sequence as 8-byte little-endian
//!   3. prev_hash as UTF-8 bytes (64 ASCII hex chars)
//!   4. compact JSON of the audit event

use sha2::{Digest, Sha256};

use conduit_contracts::{
    audit::AuditEvent,
    error::{ConduitError, ConduitResult},
};

use crate::event::ChainedEvent;

/// Compute the SHA-256 hash for one chain entry.
///
/// Returns a lowercase 64-character hex string.
pub fn hash_event(log_id: &str, sequence: u64, event: &AuditEvent, prev_hash: &str) -> ConduitResult<String> {
    let event_json = serde_json::to_vec(event).map_err(|e| ConduitError::AuditWriteFailed {
        reason: format!("audit event is not serializable: {}", e),
    })?;

    let mut hasher = Sha256::new();
    hasher.update(log_id.as_bytes());
    hasher.update(sequence.to_le_bytes());
    hasher.update(prev_hash.as_bytes());
    hasher.update(&event_json);

    Ok(hex::encode(hasher.finalize()))
}

/// Verify the integrity of a hash chain.
///
/// Valid when every entry's `prev_hash` is the previous entry's `this_hash`
/// (`GENESIS_HASH` for the first), every `sequence` equals its position, and
/// every `this_hash` matches the value recomputed from the entry. An empty
/// chain is valid.
pub fn verify_chain(entries: &[ChainedEvent]) -> bool {
    let mut expected_prev = ChainedEvent::GENESIS_HASH.to_string();

    for (position, entry) in entries.iter().enumerate() {
        if entry.sequence != position as u64 || entry.prev_hash != expected_prev {
            return false;
        }

        match hash_event(&entry.log_id, entry.sequence, &entry.event, &entry.prev_hash) {
            Ok(recomputed) if recomputed == entry.this_hash => {}
            _ => return false,
        }

        expected_prev = entry.this_hash.clone();
    }

    true
}
