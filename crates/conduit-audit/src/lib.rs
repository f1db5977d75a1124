//! # conduit-audit
//!
//! Append-only, SHA-256 hash-chained audit trail for Conduit.
//!
//! Every tool invocation result and routing decision is wrapped in a
//! `ChainedEvent` that links to the previous entry via its hash. Tampering
//! with any entry breaks the chain and is detected by `verify_chain`.
//!
//! ```rust,ignore
//! use conduit_audit::ChainedAuditSink;
//! use conduit_core::traits::AuditSink;
//!
//! let sink = ChainedAuditSink::new("session-001");
//! sink.record(&event)?;
//! assert!(sink.verify_integrity());
//! ```

pub mod chain;
pub mod event;
pub mod memory;

pub use chain::{hash_event, verify_chain};
pub use event::{AuditLog, ChainedEvent};
pub use memory::ChainedAuditSink;

// ── Tests ─────────────────────────────────────────────────────────────────────
