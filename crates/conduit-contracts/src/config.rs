//! Configuration consumed by the orchestration core.
//!
//! All durations are expressed in milliseconds in the file format and exposed
//! as `Duration` through accessor methods.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{model::ModelDescriptor, sandbox::SandboxPolicy, tool::ServerId};

/// Exponential reconnect backoff bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_backoff_initial_ms")]
    pub initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub max_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,
    /// Reconnect attempts before the session is closed for good.
    #[serde(default = "default_backoff_attempts")]
    pub max_attempts: u32,
}

impl BackoffConfig {
    /// Delay before reconnect attempt `attempt` (0-based), capped at `max_ms`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.min(63) as i32);
        let ms = (self.initial_ms as f64 * factor).min(self.max_ms as f64);
        Duration::from_millis(ms as u64)
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: default_backoff_initial_ms(),
            max_ms: default_backoff_max_ms(),
            multiplier: default_backoff_multiplier(),
            max_attempts: default_backoff_attempts(),
        }
    }
}

fn default_backoff_initial_ms() -> u64 {
    250
}
fn default_backoff_max_ms() -> u64 {
    10_000
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_backoff_attempts() -> u32 {
    5
}

/// Connection settings and sandbox for one capability server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub id: ServerId,
    /// `ws://` / `wss://` URL, or `memory://<name>` for in-process servers.
    pub url: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Consecutive unanswered pings before the session is marked Degraded.
    #[serde(default = "default_max_missed_pongs")]
    pub max_missed_pongs: u32,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub sandbox: SandboxPolicy,
}

impl ServerConfig {
    /// A config with every timeout at its default.
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: ServerId::new(id),
            url: url.into(),
            connect_timeout_ms: default_connect_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            max_missed_pongs: default_max_missed_pongs(),
            request_timeout_ms: default_request_timeout_ms(),
            backoff: BackoffConfig::default(),
            sandbox: SandboxPolicy::default(),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_handshake_timeout_ms() -> u64 {
    5_000
}
fn default_heartbeat_interval_ms() -> u64 {
    15_000
}
fn default_max_missed_pongs() -> u32 {
    3
}
fn default_request_timeout_ms() -> u64 {
    30_000
}

/// Weights of the routing score. Must sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub quality: f64,
    pub performance: f64,
    pub cost: f64,
    pub availability: f64,
}

impl ScoreWeights {
    pub fn sum(&self) -> f64 {
        self.quality + self.performance + self.cost + self.availability
    }

    /// True if the weights sum to 1.0 within floating-point tolerance.
    pub fn is_normalized(&self) -> bool {
        (self.sum() - 1.0).abs() <= 1e-6
    }
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self { quality: 0.4, performance: 0.3, cost: 0.2, availability: 0.1 }
    }
}

/// Router and health-monitor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingConfig {
    #[serde(default)]
    pub weights: ScoreWeights,
    /// Budget for a single model attempt.
    #[serde(default = "default_model_timeout_ms")]
    pub model_timeout_ms: u64,
    /// Consecutive failures before a model is marked Unavailable.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// How long an Unavailable model sits out before it is tried again.
    #[serde(default = "default_recovery_after_ms")]
    pub recovery_after_ms: u64,
    /// Tool calls allowed per request before the loop gives up.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,
    /// `host:port` probed to decide whether we are online. None means
    /// "assume online".
    #[serde(default)]
    pub probe: Option<String>,
}

impl RoutingConfig {
    pub fn model_timeout(&self) -> Duration {
        Duration::from_millis(self.model_timeout_ms)
    }

    pub fn recovery_after(&self) -> Duration {
        Duration::from_millis(self.recovery_after_ms)
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            model_timeout_ms: default_model_timeout_ms(),
            failure_threshold: default_failure_threshold(),
            recovery_after_ms: default_recovery_after_ms(),
            max_tool_rounds: default_max_tool_rounds(),
            probe: None,
        }
    }
}

fn default_model_timeout_ms() -> u64 {
    30_000
}
fn default_failure_threshold() -> u32 {
    3
}
fn default_recovery_after_ms() -> u64 {
    60_000
}
fn default_max_tool_rounds() -> u32 {
    8
}

/// Confirmation-gate settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalConfig {
    #[serde(default = "default_expiry_ms")]
    pub expiry_ms: u64,
}

impl ApprovalConfig {
    pub fn expiry(&self) -> Duration {
        Duration::from_millis(self.expiry_ms)
    }
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self { expiry_ms: default_expiry_ms() }
    }
}

fn default_expiry_ms() -> u64 {
    30_000
}

/// The whole configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
    #[serde(default)]
    pub models: Vec<ModelDescriptor>,
}
