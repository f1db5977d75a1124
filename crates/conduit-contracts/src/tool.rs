//! Capability server and tool descriptor types.
//!
//! A capability server advertises its tools once per handshake. The
//! advertisement is turned into `ToolDescriptor`s by the registry, which pins
//! every tool to the server that owns it.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable identifier for a configured capability server.
///
/// Example: ServerId("filesystem")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerId(pub String);

impl ServerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How much a tool can change the world when it runs.
///
/// Read-only sandboxes admit only `Read` tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffectClass {
    Read,
    Write,
    Destructive,
    System,
}

impl SideEffectClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Destructive => "destructive",
            Self::System => "system",
        }
    }
}

/// One entry of the `capabilities` handshake frame, exactly as the server
/// sent it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolAdvert {
    pub name: String,
    /// JSON Schema describing the tool's `arguments` object.
    #[serde(default = "empty_object_schema")]
    pub schema: serde_json::Value,
    pub side_effect_class: SideEffectClass,
    #[serde(default)]
    pub requires_confirmation: bool,
}

fn empty_object_schema() -> serde_json::Value {
    serde_json::json!({ "type": "object" })
}

/// A registered tool, pinned to its owning server.
///
/// Immutable after registration. A re-handshake replaces the whole set of
/// descriptors for a server rather than editing any of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub server_id: ServerId,
    pub parameter_schema: serde_json::Value,
    pub side_effect_class: SideEffectClass,
    pub requires_confirmation: bool,
}

impl ToolDescriptor {
    /// Build the descriptor for `advert` as owned by `server_id`.
    pub fn from_advert(server_id: ServerId, advert: ToolAdvert) -> Self {
        Self {
            name: advert.name,
            server_id,
            parameter_schema: advert.schema,
            side_effect_class: advert.side_effect_class,
            requires_confirmation: advert.requires_confirmation,
        }
    }
}
