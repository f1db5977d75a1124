//! Loading and validating the orchestrator configuration.
//!
//! Parsing is shape-only; `validate` applies the semantic rules. `load` and
//! `parse` do both, so a config that reaches the builder is always valid.

use std::{collections::HashSet, path::Path};

use tracing::info;

use conduit_contracts::{
    config::{OrchestratorConfig, ServerConfig},
    error::{ConduitError, ConduitResult},
    model::ModelDescriptor,
};
use conduit_policy::FromToml;

/// Read, parse, and validate the configuration file at `path`.
pub fn load(path: &Path) -> ConduitResult<OrchestratorConfig> {
    let config = OrchestratorConfig::from_file(path)?;
    validate(&config)?;
    info!(
        path = %path.display(),
        servers = config.servers.len(),
        models = config.models.len(),
        "configuration loaded"
    );
    Ok(config)
}

/// Parse and validate a configuration document.
pub fn parse(s: &str) -> ConduitResult<OrchestratorConfig> {
    let config = OrchestratorConfig::from_toml_str(s)?;
    validate(&config)?;
    Ok(config)
}

fn invalid(reason: impl Into<String>) -> ConduitError {
    ConduitError::Config { reason: reason.into() }
}

/// Check every rule the file format cannot express.
pub fn validate(config: &OrchestratorConfig) -> ConduitResult<()> {
    let routing = &config.routing;
    let weights = &routing.weights;
    if [weights.quality, weights.performance, weights.cost, weights.availability]
        .iter()
        .any(|w| !w.is_finite() || *w < 0.0)
    {
        return Err(invalid("routing weights must be finite and non-negative"));
    }
    if !weights.is_normalized() {
        return Err(invalid(format!("routing weights sum to {}, expected 1.0", weights.sum())));
    }
    if routing.model_timeout_ms == 0 {
        return Err(invalid("routing.model_timeout_ms must be positive"));
    }
    if routing.failure_threshold == 0 {
        return Err(invalid("routing.failure_threshold must be at least 1"));
    }
    if routing.recovery_after_ms == 0 {
        return Err(invalid("routing.recovery_after_ms must be positive"));
    }
    if routing.max_tool_rounds == 0 {
        return Err(invalid("routing.max_tool_rounds must be at least 1"));
    }
    if config.approval.expiry_ms == 0 {
        return Err(invalid("approval.expiry_ms must be positive"));
    }

    let mut server_ids = HashSet::new();
    for server in &config.servers {
        if !server_ids.insert(&server.id) {
            return Err(invalid(format!("server id '{}' is configured twice", server.id)));
        }
        validate_server(server)?;
    }

    let mut model_ids = HashSet::new();
    for model in &config.models {
        if !model_ids.insert(&model.id) {
            return Err(invalid(format!("model id '{}' is configured twice", model.id)));
        }
        if !server_ids.contains(&model.endpoint.server) {
            return Err(invalid(format!(
                "model '{}' uses server '{}', which is not configured",
                model.id, model.endpoint.server
            )));
        }
        validate_model(model)?;
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> ConduitResult<()> {
    let id = &server.id;
    if server.url.trim().is_empty() {
        return Err(invalid(format!("server '{id}' has an empty url")));
    }
    for (name, value) in [
        ("connect_timeout_ms", server.connect_timeout_ms),
        ("handshake_timeout_ms", server.handshake_timeout_ms),
        ("heartbeat_interval_ms", server.heartbeat_interval_ms),
        ("request_timeout_ms", server.request_timeout_ms),
    ] {
        if value == 0 {
            return Err(invalid(format!("server '{id}': {name} must be positive")));
        }
    }
    if server.max_missed_pongs == 0 {
        return Err(invalid(format!("server '{id}': max_missed_pongs must be at least 1")));
    }

    let backoff = &server.backoff;
    if backoff.initial_ms == 0 || backoff.max_ms < backoff.initial_ms {
        return Err(invalid(format!(
            "server '{id}': backoff needs 0 < initial_ms <= max_ms (got {} and {})",
            backoff.initial_ms, backoff.max_ms
        )));
    }
    if !backoff.multiplier.is_finite() || backoff.multiplier < 1.0 {
        return Err(invalid(format!("server '{id}': backoff multiplier must be >= 1.0")));
    }
    if backoff.max_attempts == 0 {
        return Err(invalid(format!("server '{id}': backoff max_attempts must be at least 1")));
    }
    Ok(())
}

fn validate_model(model: &ModelDescriptor) -> ConduitResult<()> {
    for (name, value) in [
        ("quality", model.quality),
        ("performance", model.performance),
        ("cost", model.cost),
    ] {
        if !(0.0..=1.0).contains(&value) {
            return Err(invalid(format!("model '{}': {name} must be within [0, 1], got {value}", model.id)));
        }
    }
    if model.endpoint.tool.trim().is_empty() {
        return Err(invalid(format!("model '{}' has an empty endpoint tool", model.id)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use conduit_contracts::error::ConduitError;

    use super::parse;

    const VALID: &str = r#"
        [approval]
        expiry_ms = 30000

        [routing]
        model_timeout_ms = 20000
        probe = "1.1.1.1:53"
        [routing.weights]
        quality = 0.4
        performance = 0.3
        cost = 0.2
        availability = 0.1

        [[servers]]
        id = "filesystem"
        url = "ws://127.0.0.1:9101"
        [servers.sandbox]
        allowed_roots = ["/srv/sandbox"]
        denied_extensions = ["exe"]

        [[servers]]
        id = "local-llm"
        url = "ws://127.0.0.1:9200"

        [[models]]
        id = "llama-local"
        locality = "local"
        priority = 5
        quality = 0.6
        performance = 0.8
        cost = 0.0
        endpoint = { server = "local-llm" }
    "#;

    fn reason(toml: &str) -> String {
        match parse(toml) {
            Err(ConduitError::Config { reason }) => reason,
            other => panic!("expected a config error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn full_example_parses_with_defaults_filled_in() {
        let config = parse(VALID).unwrap();
        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.servers[0].request_timeout_ms, 30_000);
        assert_eq!(config.servers[0].sandbox.allowed_roots.len(), 1);
        assert_eq!(config.models[0].endpoint.tool, "generate");
        assert_eq!(config.routing.max_tool_rounds, 8);
        assert_eq!(config.routing.probe.as_deref(), Some("1.1.1.1:53"));
    }

    #[test]
    fn empty_document_is_valid() {
        let config = parse("").unwrap();
        assert!(config.servers.is_empty());
        assert_eq!(config.approval.expiry_ms, 30_000);
    }

    #[test]
    fn weights_must_sum_to_one() {
        let toml = VALID.replace("availability = 0.1", "availability = 0.2");
        assert!(reason(&toml).contains("sum"));
    }

    #[test]
    fn duplicate_server_ids_are_rejected() {
        let toml = VALID.replace(r#"id = "local-llm""#, r#"id = "filesystem""#);
        assert!(reason(&toml).contains("configured twice"));
    }

    #[test]
    fn model_endpoint_must_name_a_server() {
        let toml = VALID.replace(r#"endpoint = { server = "local-llm" }"#, r#"endpoint = { server = "nowhere" }"#);
        assert!(reason(&toml).contains("nowhere"));
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let toml = VALID.replace("model_timeout_ms = 20000", "model_timeout_ms = 0");
        assert!(reason(&toml).contains("model_timeout_ms"));

        let toml = VALID.replace(
            r#"url = "ws://127.0.0.1:9101""#,
            "url = \"ws://127.0.0.1:9101\"\nrequest_timeout_ms = 0",
        );
        assert!(reason(&toml).contains("request_timeout_ms"));
    }

    #[test]
    fn backoff_bounds_are_checked() {
        let toml = VALID.replace(
            r#"url = "ws://127.0.0.1:9200""#,
            "url = \"ws://127.0.0.1:9200\"\n[servers.backoff]\ninitial_ms = 500\nmax_ms = 100",
        );
        assert!(reason(&toml).contains("backoff"));
    }

    #[test]
    fn model_scores_stay_in_unit_range() {
        let toml = VALID.replace("quality = 0.6", "quality = 1.5");
        assert!(reason(&toml).contains("quality"));
    }

    #[test]
    fn malformed_toml_is_config_error() {
        assert!(reason("[routing\nmodel_timeout_ms = ").contains("TOML"));
    }
}
