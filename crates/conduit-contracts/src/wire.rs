//! JSON frames exchanged with capability servers.
//!
//! Every frame is a JSON object carrying a `type` discriminant, sent as one
//! text message on a persistent duplex connection.

use serde::{Deserialize, Serialize};

use crate::tool::ToolAdvert;

/// Frames the orchestrator sends to a capability server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    ToolCall {
        id: String,
        tool: String,
        arguments: serde_json::Value,
        deadline_ms: u64,
    },
    /// Best-effort notice that the caller no longer wants the result.
    Cancel {
        id: String,
    },
    Ping,
    Pong,
}

/// Frames a capability server sends to the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Sent once, immediately after connect.
    Capabilities {
        tools: Vec<ToolAdvert>,
    },
    ToolResult {
        id: String,
        #[serde(default)]
        payload: Option<serde_json::Value>,
    },
    Error {
        #[serde(default)]
        id: Option<String>,
        error: WireError,
    },
    Ping,
    Pong,
}

/// Error body carried by an `error` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub code: String,
    pub message: String,
}

impl ClientFrame {
    pub fn encode(&self) -> String {
        // Serializing these enums cannot fail: every field is a plain JSON value.
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

impl ServerFrame {
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
