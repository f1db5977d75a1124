//! In-memory implementation of `AuditSink`.
//!
//! `ChainedAuditSink` keeps every event in a hash chain behind a `Mutex` and
//! mirrors each one to `tracing` as it is recorded. Use `export_log()` to
//! obtain a snapshot and `verify_integrity()` to confirm the chain has not
//! been tampered with in memory.

use std::sync::Mutex;

use chrono::Utc;
use tracing::info;

use conduit_contracts::{
    audit::AuditEvent,
    error::{ConduitError, ConduitResult},
};
use conduit_core::traits::AuditSink;

use crate::{
    chain::{hash_event, verify_chain},
    event::{AuditLog, ChainedEvent},
};

// ── Internal mutable state ────────────────────────────────────────────────────

pub(crate) struct ChainState {
    pub(crate) events: Vec<ChainedEvent>,
    pub(crate) sequence: u64,
    pub(crate) last_hash: String,
}

// ── Public sink ───────────────────────────────────────────────────────────────

/// An append-only audit sink backed by a SHA-256 hash chain.
pub struct ChainedAuditSink {
    log_id: String,
    pub(crate) state: Mutex<ChainState>,
}

impl ChainedAuditSink {
    pub fn new(log_id: impl Into<String>) -> Self {
        Self {
            log_id: log_id.into(),
            state: Mutex::new(ChainState {
                events: Vec::new(),
                sequence: 0,
                last_hash: ChainedEvent::GENESIS_HASH.to_string(),
            }),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.events.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot every event recorded so far.
    pub fn export_log(&self) -> ConduitResult<AuditLog> {
        let state = self.lock()?;
        Ok(AuditLog {
            log_id: self.log_id.clone(),
            events: state.events.clone(),
            exported_at: Utc::now(),
            terminal_hash: state.events.last().map(|e| e.this_hash.clone()).unwrap_or_default(),
        })
    }

    /// True if the in-memory chain still verifies.
    pub fn verify_integrity(&self) -> bool {
        match self.lock() {
            Ok(state) => verify_chain(&state.events),
            Err(_) => false,
        }
    }

    fn lock(&self) -> ConduitResult<std::sync::MutexGuard<'_, ChainState>> {
        self.state.lock().map_err(|e| ConduitError::AuditWriteFailed {
            reason: format!("audit state lock poisoned: {}", e),
        })
    }
}

// ── AuditSink impl ────────────────────────────────────────────────────────────

impl AuditSink for ChainedAuditSink {
    fn record(&self, event: &AuditEvent) -> ConduitResult<()> {
        let mut state = self.lock()?;

        let prev_hash = state.last_hash.clone();
        let sequence = state.sequence;
        let this_hash = hash_event(&self.log_id, sequence, event, &prev_hash)?;

        info!(
            sequence,
            actor = %event.actor,
            action = %event.action,
            resource = %event.resource,
            outcome = %event.outcome,
            "audit"
        );

        state.events.push(ChainedEvent {
            sequence,
            log_id: self.log_id.clone(),
            event: event.clone(),
            prev_hash,
            this_hash: this_hash.clone(),
        });
        state.sequence += 1;
        state.last_hash = this_hash;

        Ok(())
    }
}
