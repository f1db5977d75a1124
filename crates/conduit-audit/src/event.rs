//! Chain entry and exported log types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use conduit_contracts::audit::AuditEvent;

/// One audit event, sealed into the chain.
///
/// Modifying any field, including those of the wrapped `event`, invalidates
/// `this_hash` and every later `prev_hash`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainedEvent {
    /// Position in the chain, starting at 0.
    pub sequence: u64,
    pub log_id: String,
    pub event: AuditEvent,
    /// `this_hash` of the previous entry, or `GENESIS_HASH`.
    pub prev_hash: String,
    pub this_hash: String,
}

impl ChainedEvent {
    /// The `prev_hash` of the first entry in every chain.
    pub const GENESIS_HASH: &'static str =
        "0000000000000000000000000000000000000000000000000000000000000000";
}

/// A snapshot of a chain, suitable for writing out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    pub log_id: String,
    pub events: Vec<ChainedEvent>,
    pub exported_at: DateTime<Utc>,
    /// `this_hash` of the last entry. Empty if the log is empty.
    pub terminal_hash: String,
}
