//! # conduit-contracts
//!
//! Shared types, wire frames, and contracts for the Conduit orchestration core.
//!
//! All crates in the workspace import from here. No business logic lives in
//! this crate: only data definitions and error types.

pub mod approval;
pub mod audit;
pub mod config;
pub mod error;
pub mod invocation;
pub mod model;
pub mod sandbox;
pub mod tool;
pub mod wire;
