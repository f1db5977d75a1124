//! # conduit-core
//!
//! The sandbox-enforcing tool invocation path for Conduit.
//!
//! This crate provides:
//! - The three boundary traits (`SandboxEvaluator`, `ToolChannel`, `AuditSink`)
//! - The `ToolRegistry` that maps tool names to their owning server
//! - The `ApprovalGate` holding confirmation tickets
//! - The `Dispatcher` that wires them together in the correct trust order
//!
//! ## Usage
//!
//! ```rust,ignore
//! use conduit_core::{Dispatcher, registry::ToolRegistry, approval::ApprovalGate};
//! ```

pub mod approval;
pub mod dispatcher;
pub mod registry;
pub mod targets;
pub mod traits;

pub use dispatcher::{Dispatcher, ServerBinding};
