//! The routing policy table and model ranking.
//!
//! `route` is a pure function of its inputs apart from the decision
//! timestamp: the same classification, models, health and connectivity
//! always produce the same primary and fallback chain.

use std::cmp::Ordering;

use chrono::Utc;
use tracing::debug;

use conduit_contracts::{
    config::ScoreWeights,
    error::{ConduitError, ConduitResult},
    model::{AvailabilityState, Category, Classification, Locality, ModelDescriptor, RoutingDecision},
};

use crate::health::HealthSnapshot;

/// Which locality tier the policy table prefers for a request.
pub fn preferred_locality(classification: &Classification, online: bool) -> Locality {
    if classification.category == Category::SystemCommand || !online {
        Locality::Local
    } else if classification.complexity.prefers_cloud() {
        Locality::Cloud
    } else {
        Locality::Local
    }
}

/// Weighted score of one model. Cost is inverted so cheaper scores higher.
pub fn score(model: &ModelDescriptor, availability: f64, weights: &ScoreWeights) -> f64 {
    weights.quality * model.quality
        + weights.performance * model.performance
        + weights.cost * (1.0 - model.cost)
        + weights.availability * availability
}

struct Candidate<'a> {
    model: &'a ModelDescriptor,
    score: f64,
}

/// Higher score, then higher priority, then lexically smaller id.
fn by_rank(a: &Candidate<'_>, b: &Candidate<'_>) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.model.priority.cmp(&a.model.priority))
        .then_with(|| a.model.id.cmp(&b.model.id))
}

/// Choose a primary model and fallback chain for `classification`.
///
/// Unavailable models are never candidates; when offline, cloud models are
/// excluded entirely. Returns `ModelUnavailable` with no attempts when no
/// candidate remains.
pub fn route(
    classification: Classification,
    models: &[ModelDescriptor],
    health: &HealthSnapshot,
    weights: &ScoreWeights,
    online: bool,
) -> ConduitResult<RoutingDecision> {
    let preferred = preferred_locality(&classification, online);

    let mut preferred_tier = Vec::new();
    let mut other_tier = Vec::new();
    for model in models {
        let state = health.state(&model.id).unwrap_or(model.availability);
        if state == AvailabilityState::Unavailable {
            continue;
        }
        if !online && model.locality == Locality::Cloud {
            continue;
        }
        let candidate = Candidate { model, score: score(model, health.score(&model.id), weights) };
        if model.locality == preferred {
            preferred_tier.push(candidate);
        } else {
            other_tier.push(candidate);
        }
    }
    preferred_tier.sort_by(by_rank);
    other_tier.sort_by(by_rank);

    let mut chain = preferred_tier.into_iter().chain(other_tier).map(|c| c.model.id.clone());
    let Some(primary) = chain.next() else {
        return Err(ConduitError::ModelUnavailable { attempts: Vec::new() });
    };
    let fallbacks: Vec<_> = chain.collect();

    debug!(
        category = ?classification.category,
        complexity = ?classification.complexity,
        ?preferred,
        online,
        primary = %primary,
        fallback_count = fallbacks.len(),
        "routing decided"
    );

    Ok(RoutingDecision { classification, primary, fallbacks, decided_at: Utc::now() })
}

#[cfg(test)]
mod tests {
    use conduit_contracts::{
        config::ScoreWeights,
        error::ConduitError,
        model::{
            AvailabilityState, Category, Classification, Complexity, Locality, ModelDescriptor, ModelEndpoint,
            ModelId,
        },
        tool::ServerId,
    };

    use super::route;
    use crate::health::HealthSnapshot;

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn model(id: &str, locality: Locality, quality: f64, priority: i32) -> ModelDescriptor {
        ModelDescriptor {
            id: ModelId::new(id),
            capabilities: vec![],
            priority,
            locality,
            quality,
            performance: 0.5,
            cost: if locality == Locality::Cloud { 0.5 } else { 0.0 },
            availability: AvailabilityState::Available,
            endpoint: ModelEndpoint { server: ServerId::new("llm"), tool: "generate".to_string() },
        }
    }

    fn fleet() -> Vec<ModelDescriptor> {
        vec![
            model("local-small", Locality::Local, 0.4, 1),
            model("local-big", Locality::Local, 0.6, 1),
            model("cloud-best", Locality::Cloud, 1.0, 1),
            model("cloud-ok", Locality::Cloud, 0.8, 1),
        ]
    }

    fn class(complexity: Complexity, category: Category) -> Classification {
        Classification { complexity, category }
    }

    fn ids(decision: &conduit_contracts::model::RoutingDecision) -> Vec<String> {
        decision.chain().map(|m| m.0.clone()).collect()
    }

    // ── Policy table ──────────────────────────────────────────────────────────

    /// Even when a cloud model outscores every local one.
    #[test]
    fn system_commands_prefer_local() {
        let d = route(
            class(Complexity::Complex, Category::SystemCommand),
            &fleet(),
            &HealthSnapshot::default(),
            &ScoreWeights::default(),
            true,
        )
        .unwrap();
        assert_eq!(d.primary, ModelId::new("local-big"));
        assert_eq!(ids(&d), vec!["local-big", "local-small", "cloud-best", "cloud-ok"]);
    }

    #[test]
    fn offline_excludes_cloud_entirely() {
        let d = route(
            class(Complexity::Creative, Category::Creative),
            &fleet(),
            &HealthSnapshot::default(),
            &ScoreWeights::default(),
            false,
        )
        .unwrap();
        assert_eq!(ids(&d), vec!["local-big", "local-small"]);
    }

    #[test]
    fn complex_requests_prefer_cloud_when_online() {
        let d = route(
            class(Complexity::Analytical, Category::Analysis),
            &fleet(),
            &HealthSnapshot::default(),
            &ScoreWeights::default(),
            true,
        )
        .unwrap();
        assert_eq!(ids(&d), vec!["cloud-best", "cloud-ok", "local-big", "local-small"]);
    }

    #[test]
    fn simple_requests_prefer_local() {
        let d = route(
            class(Complexity::Simple, Category::General),
            &fleet(),
            &HealthSnapshot::default(),
            &ScoreWeights::default(),
            true,
        )
        .unwrap();
        assert_eq!(d.primary, ModelId::new("local-big"));
    }

    // ── Ranking ───────────────────────────────────────────────────────────────

    #[test]
    fn ties_break_on_priority_then_id() {
        let models = vec![
            model("b", Locality::Local, 0.5, 1),
            model("a", Locality::Local, 0.5, 1),
            model("c", Locality::Local, 0.5, 9),
        ];
        let d = route(
            class(Complexity::Simple, Category::General),
            &models,
            &HealthSnapshot::default(),
            &ScoreWeights::default(),
            true,
        )
        .unwrap();
        assert_eq!(ids(&d), vec!["c", "a", "b"]);
    }

    #[test]
    fn unavailable_models_are_never_candidates() {
        let mut models = fleet();
        models[1].availability = AvailabilityState::Unavailable;
        let d = route(
            class(Complexity::Simple, Category::General),
            &models,
            &HealthSnapshot::default(),
            &ScoreWeights::default(),
            true,
        )
        .unwrap();
        assert!(!ids(&d).contains(&"local-big".to_string()));
    }

    #[test]
    fn no_candidates_is_model_unavailable_with_no_attempts() {
        let result = route(
            class(Complexity::Simple, Category::General),
            &[model("cloud-only", Locality::Cloud, 1.0, 1)],
            &HealthSnapshot::default(),
            &ScoreWeights::default(),
            false,
        );
        match result {
            Err(ConduitError::ModelUnavailable { attempts }) => assert!(attempts.is_empty()),
            other => panic!("expected ModelUnavailable, got {:?}", other),
        }
    }

    #[test]
    fn identical_inputs_give_identical_decisions() {
        let run = || {
            route(
                class(Complexity::Complex, Category::Code),
                &fleet(),
                &HealthSnapshot::default(),
                &ScoreWeights::default(),
                true,
            )
            .unwrap()
        };
        let (a, b) = (run(), run());
        assert_eq!(a.primary, b.primary);
        assert_eq!(a.fallbacks, b.fallbacks);
    }
}
