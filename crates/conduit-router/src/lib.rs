//! # conduit-router
//!
//! Picks which model answers a request, and walks the fallback chain when it
//! does not.
//!
//! ```text
//! text ─▶ classify ─▶ route(classification, models, health, online)
//!                         │
//!                         ▼
//!                 RoutingDecision { primary, fallbacks }
//!                         │
//!                         ▼
//!      invoke: primary ─✗▶ fallback[0] ─✗▶ fallback[1] … ─✗▶ ModelUnavailable
//! ```
//!
//! Health is owned by a single monitor task; the router only reads its
//! snapshots and sends it reports.

pub mod backend;
pub mod classifier;
pub mod health;
pub mod policy;
pub mod probe;
pub mod router;

pub use backend::{ModelBackend, SessionModelBackend};
pub use classifier::{classify, ClassifyContext};
pub use health::{HealthHandle, HealthReport, HealthSnapshot};
pub use probe::{ConnectivityProbe, StaticProbe, TcpProbe};
pub use router::ModelRouter;

// ── Tests ─────────────────────────────────────────────────────────────────────
