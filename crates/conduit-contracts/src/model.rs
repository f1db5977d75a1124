//! Model backend, classification, and routing types.
//!
//! The classifier produces a `Classification`; the router turns it plus the
//! current health snapshot into a `RoutingDecision`. Neither is persisted
//! across requests.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tool::{ServerId, ToolDescriptor};

/// Stable identifier for a model backend, e.g. ModelId("llama-3-8b-local").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelId(pub String);

impl ModelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a model runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locality {
    Local,
    Cloud,
}

/// Health-derived availability of a model backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvailabilityState {
    #[default]
    Available,
    Degraded,
    Unavailable,
}

/// The session endpoint a model is invoked through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelEndpoint {
    pub server: ServerId,
    /// Tool name the model server exposes for completions.
    #[serde(default = "default_generate_tool")]
    pub tool: String,
}

fn default_generate_tool() -> String {
    "generate".to_string()
}

/// Static description of a model backend plus its current availability.
///
/// `quality`, `performance` and `cost` are normalised to `[0, 1]`; cost is
/// inverted during scoring so cheaper models score higher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: ModelId,
    /// Capability tags, e.g. "code", "reasoning", "creative".
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Static tie-break priority. Higher wins.
    #[serde(default)]
    pub priority: i32,
    pub locality: Locality,
    pub quality: f64,
    pub performance: f64,
    pub cost: f64,
    #[serde(default)]
    pub availability: AvailabilityState,
    pub endpoint: ModelEndpoint,
}

impl ModelDescriptor {
    pub fn has_capability(&self, tag: &str) -> bool {
        self.capabilities.iter().any(|c| c.eq_ignore_ascii_case(tag))
    }
}

/// How demanding a request is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Moderate,
    Complex,
    Creative,
    Analytical,
}

impl Complexity {
    /// True for the complexities that prefer a cloud model when online.
    pub fn prefers_cloud(&self) -> bool {
        matches!(self, Self::Complex | Self::Creative | Self::Analytical)
    }
}

/// What kind of request this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    SystemCommand,
    FileOperation,
    Code,
    Creative,
    Analysis,
    General,
}

/// Classifier output. Advisory input to the router, not a hard constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Classification {
    pub complexity: Complexity,
    pub category: Category,
}

/// The router's choice for one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    pub classification: Classification,
    pub primary: ModelId,
    /// Ordered alternates tried after `primary` fails.
    pub fallbacks: Vec<ModelId>,
    pub decided_at: DateTime<Utc>,
}

impl RoutingDecision {
    /// Primary followed by every fallback, in attempt order.
    pub fn chain(&self) -> impl Iterator<Item = &ModelId> {
        std::iter::once(&self.primary).chain(self.fallbacks.iter())
    }
}

/// One failed attempt within a fallback chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedAttempt {
    pub model_id: ModelId,
    pub reason: String,
}

/// Who produced a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// A single conversation turn sent to a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMessage {
    pub role: Role,
    pub content: String,
}

impl ModelMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self { role, content: content.into() }
    }
}

/// What a model backend is asked to complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRequest {
    pub messages: Vec<ModelMessage>,
    /// Tools the model may call this turn.
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
}

/// A model backend's answer: either final text or a request to run a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ModelReply {
    Final {
        text: String,
    },
    ToolCall {
        tool: String,
        #[serde(default)]
        arguments: serde_json::Value,
    },
}
