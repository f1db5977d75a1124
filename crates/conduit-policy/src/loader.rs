//! TOML loading for sandbox policies.

use std::path::Path;

use serde::de::DeserializeOwned;
use tracing::debug;

use conduit_contracts::{
    config::OrchestratorConfig,
    error::{ConduitError, ConduitResult},
    sandbox::SandboxPolicy,
};

/// Parse a value from a TOML document or file.
///
/// Parsing only checks shape. Callers that need semantic validation (the
/// orchestrator configuration does) run it on the parsed value.
pub trait FromToml: Sized + DeserializeOwned {
    /// Parse `s` as TOML.
    ///
    /// Returns `ConduitError::Config` if the TOML is malformed or does not
    /// match the expected shape.
    fn from_toml_str(s: &str) -> ConduitResult<Self> {
        toml::from_str(s).map_err(|e| ConduitError::Config {
            reason: format!("failed to parse TOML: {}", e),
        })
    }

    /// Read the file at `path` and parse it as TOML.
    fn from_file(path: &Path) -> ConduitResult<Self> {
        debug!(path = %path.display(), "loading TOML");
        let contents = std::fs::read_to_string(path).map_err(|e| ConduitError::Config {
            reason: format!("failed to read '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }
}

impl FromToml for SandboxPolicy {}
impl FromToml for OrchestratorConfig {}
