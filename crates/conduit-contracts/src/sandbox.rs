//! Sandbox policy and access-request types.
//!
//! A `SandboxPolicy` is loaded once per capability server and never changes
//! for the lifetime of a session. The evaluator consumes an `AccessRequest`
//! describing everything a tool call would touch and returns a
//! `SandboxVerdict`.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{invocation::DenyReason, tool::SideEffectClass};

/// The constraints bounding what a capability server's tools may touch.
///
/// Deny-by-default for paths: an empty `allowed_roots` admits no path at all.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SandboxPolicy {
    /// Path prefixes a tool may touch. Compared after symlink resolution.
    #[serde(default)]
    pub allowed_roots: Vec<PathBuf>,

    /// Path prefixes that are off-limits even inside an allowed root.
    #[serde(default)]
    pub denied_roots: Vec<PathBuf>,

    /// If non-empty, only these extensions (no leading dot) are admitted.
    #[serde(default)]
    pub allowed_extensions: Vec<String>,

    /// Extensions that are never admitted. Checked before `allowed_extensions`.
    #[serde(default)]
    pub denied_extensions: Vec<String>,

    /// Upper bound on the size of any resource read or written, in bytes.
    #[serde(default)]
    pub max_resource_bytes: Option<u64>,

    /// When set, only `SideEffectClass::Read` tools are admitted.
    #[serde(default)]
    pub read_only: bool,

    /// Process names tools may never act on (case-insensitive).
    #[serde(default)]
    pub blocked_processes: Vec<String>,

    /// Application names tools may never act on (case-insensitive).
    #[serde(default)]
    pub blocked_applications: Vec<String>,

    /// Tool names that need user confirmation regardless of what the server
    /// advertised.
    #[serde(default)]
    pub require_confirmation: Vec<String>,
}

impl SandboxPolicy {
    /// True if `tool` appears in the policy's confirmation list.
    pub fn demands_confirmation(&self, tool: &str) -> bool {
        self.require_confirmation.iter().any(|t| t == tool)
    }
}

/// Everything one tool call would touch, extracted from its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessRequest {
    pub tool: String,
    pub side_effect_class: SideEffectClass,
    #[serde(default)]
    pub paths: Vec<PathBuf>,
    #[serde(default)]
    pub processes: Vec<String>,
    #[serde(default)]
    pub applications: Vec<String>,
    /// Size the call declares it will write, if any.
    #[serde(default)]
    pub declared_bytes: Option<u64>,
}

impl AccessRequest {
    pub fn new(tool: impl Into<String>, side_effect_class: SideEffectClass) -> Self {
        Self {
            tool: tool.into(),
            side_effect_class,
            paths: Vec::new(),
            processes: Vec::new(),
            applications: Vec::new(),
            declared_bytes: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.paths.push(path.into());
        self
    }
}

/// The sandbox evaluator's decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SandboxVerdict {
    Allow,
    Deny {
        reason: DenyReason,
        /// Human-readable context, e.g. the offending path.
        detail: String,
    },
}

impl SandboxVerdict {
    pub fn deny(reason: DenyReason, detail: impl Into<String>) -> Self {
        Self::Deny { reason, detail: detail.into() }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow)
    }
}
