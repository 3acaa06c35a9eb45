//! Match aggregation and resolution.
//!
//! Each mapping gets the mean of its matchers' scores. Mappings are scanned
//! by priority (lowest first), then registration order, and the first with a
//! perfect score wins. If none is perfect, the best-scoring mapping is
//! reported as the closest miss.

use crate::config::MatchBehaviour;
use crate::mapping::Mapping;
use crate::matcher::{MatchContext, PERFECT_MATCH};
use crate::request::RequestMessage;
use crate::scenario::ScenarioSnapshot;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Score of one matcher of a mapping.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatcherScore {
    pub matcher: String,
    pub behaviour: MatchBehaviour,
    pub score: f64,
}

/// Result of evaluating one mapping against a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchResult {
    pub mapping_id: Uuid,
    pub total: f64,
    pub scores: Vec<MatcherScore>,
}

impl MatchResult {
    pub fn is_perfect(&self) -> bool {
        self.total == PERFECT_MATCH
    }
}

/// Mean of the scores; no scores at all is a perfect match.
pub fn aggregate(scores: &[MatcherScore]) -> f64 {
    if scores.is_empty() {
        return PERFECT_MATCH;
    }
    let sum: f64 = scores.iter().map(|s| s.score).sum();
    let mean = sum / scores.len() as f64;
    // Only a list of exact ones may produce exactly 1.0.
    if mean >= PERFECT_MATCH && scores.iter().any(|s| s.score < PERFECT_MATCH) {
        f64::from_bits(PERFECT_MATCH.to_bits() - 1)
    } else {
        mean
    }
}

/// Score every matcher of a mapping, plus its scenario precondition.
pub fn evaluate(
    mapping: &Mapping,
    request: &RequestMessage,
    ctx: &MatchContext<'_>,
    scenarios: &ScenarioSnapshot,
) -> MatchResult {
    let mut scores: Vec<MatcherScore> = mapping
        .matchers()
        .iter()
        .map(|matcher| MatcherScore {
            matcher: matcher.name(),
            behaviour: matcher.behaviour(),
            score: matcher.score(request, ctx),
        })
        .collect();

    if let Some(scenario) = mapping.scenario() {
        if let Some(required) = &scenario.required_state {
            let in_state = scenarios.state(&scenario.name) == required;
            scores.push(MatcherScore {
                matcher: format!("scenario:{}", scenario.name),
                behaviour: MatchBehaviour::AcceptOnMatch,
                score: if in_state { PERFECT_MATCH } else { 0.0 },
            });
        }
    }

    MatchResult {
        mapping_id: mapping.id(),
        total: aggregate(&scores),
        scores,
    }
}

/// Outcome of resolving a request.
#[derive(Debug, Clone)]
pub enum ResolveOutcome {
    Matched {
        mapping: Arc<Mapping>,
        result: MatchResult,
    },
    NoMatch {
        /// Best-scoring mapping, if any mapping exists
        closest: Option<(Arc<Mapping>, MatchResult)>,
    },
}

impl ResolveOutcome {
    pub fn mapping(&self) -> Option<&Arc<Mapping>> {
        match self {
            ResolveOutcome::Matched { mapping, .. } => Some(mapping),
            ResolveOutcome::NoMatch { .. } => None,
        }
    }

    /// Scores of the matched mapping or of the closest miss.
    pub fn result(&self) -> Option<&MatchResult> {
        match self {
            ResolveOutcome::Matched { result, .. } => Some(result),
            ResolveOutcome::NoMatch { closest } => closest.as_ref().map(|(_, r)| r),
        }
    }
}

/// Pick the mapping that serves `request`.
pub fn resolve(
    mappings: &[Arc<Mapping>],
    request: &RequestMessage,
    ctx: &MatchContext<'_>,
    scenarios: &ScenarioSnapshot,
) -> ResolveOutcome {
    let mut ordered: Vec<&Arc<Mapping>> = mappings.iter().collect();
    // Stable sort keeps registration order within a priority.
    ordered.sort_by_key(|m| m.priority());

    let mut closest: Option<(&Arc<Mapping>, MatchResult)> = None;
    for mapping in ordered {
        let result = evaluate(mapping, request, ctx, scenarios);
        debug!(
            mapping = %mapping.label(),
            total = result.total,
            "Evaluated mapping"
        );
        if result.is_perfect() {
            return ResolveOutcome::Matched {
                mapping: Arc::clone(mapping),
                result,
            };
        }
        let better = closest
            .as_ref()
            .map_or(true, |(_, best)| result.total > best.total);
        if better {
            closest = Some((mapping, result));
        }
    }

    ResolveOutcome::NoMatch {
        closest: closest.map(|(mapping, result)| (Arc::clone(mapping), result)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        MappingDefinition, MatcherDefinition, ResponseDefinition, ScenarioDefinition, ValuePattern,
    };
    use crate::request::{BodyData, UrlDetails};
    use crate::scenario::ScenarioStore;

    fn path_matcher(path: &str) -> MatcherDefinition {
        MatcherDefinition::Path {
            patterns: vec![ValuePattern::Exact {
                value: path.to_string(),
                ignore_case: false,
            }],
            behaviour: MatchBehaviour::AcceptOnMatch,
        }
    }

    fn method_matcher(method: &str) -> MatcherDefinition {
        MatcherDefinition::Method {
            methods: vec![method.to_string()],
            behaviour: MatchBehaviour::AcceptOnMatch,
        }
    }

    fn make_mapping(title: &str, priority: i32, request: Vec<MatcherDefinition>) -> Arc<Mapping> {
        Arc::new(Mapping::compile(&MappingDefinition {
            id: None,
            title: Some(title.to_string()),
            priority,
            request,
            response: ResponseDefinition::default(),
            scenario: None,
        }))
    }

    fn make_request(method: &str, url: &str) -> RequestMessage {
        RequestMessage::new(UrlDetails::parse(url).unwrap(), method, "127.0.0.1", BodyData::None)
    }

    fn title_of(outcome: &ResolveOutcome) -> Option<&str> {
        outcome.mapping().and_then(|m| m.title())
    }

    fn score(value: f64) -> MatcherScore {
        MatcherScore {
            matcher: "test".to_string(),
            behaviour: MatchBehaviour::AcceptOnMatch,
            score: value,
        }
    }

    #[test]
    fn test_aggregate_is_mean() {
        assert_eq!(aggregate(&[]), 1.0);
        assert_eq!(aggregate(&[score(1.0), score(0.0)]), 0.5);
        assert_eq!(aggregate(&[score(1.0), score(1.0)]), 1.0);
        assert!(aggregate(&[score(1.0), score(0.999_999_999_999_999_9)]) < 1.0);
    }

    #[test]
    fn test_empty_mapping_matches_everything() {
        let mappings = vec![make_mapping("catch-all", 0, vec![])];
        let outcome = resolve(
            &mappings,
            &make_request("GET", "http://localhost/anything"),
            &MatchContext::detached(),
            &ScenarioSnapshot::default(),
        );
        assert_eq!(title_of(&outcome), Some("catch-all"));
    }

    #[test]
    fn test_lower_priority_value_wins() {
        let mappings = vec![
            make_mapping("generic", 10, vec![]),
            make_mapping("specific", 1, vec![path_matcher("/api")]),
        ];
        let outcome = resolve(
            &mappings,
            &make_request("GET", "http://localhost/api"),
            &MatchContext::detached(),
            &ScenarioSnapshot::default(),
        );
        assert_eq!(title_of(&outcome), Some("specific"));
    }

    #[test]
    fn test_registration_order_breaks_ties() {
        let mappings = vec![
            make_mapping("first", 0, vec![path_matcher("/api")]),
            make_mapping("second", 0, vec![path_matcher("/api")]),
        ];
        let request = make_request("GET", "http://localhost/api");
        for _ in 0..10 {
            let outcome = resolve(
                &mappings,
                &request,
                &MatchContext::detached(),
                &ScenarioSnapshot::default(),
            );
            assert_eq!(title_of(&outcome), Some("first"));
        }
    }

    #[test]
    fn test_closest_miss_reported() {
        let mappings = vec![
            make_mapping("far", 0, vec![path_matcher("/x"), method_matcher("PUT")]),
            make_mapping("near", 0, vec![path_matcher("/api"), method_matcher("PUT")]),
            make_mapping("also-near", 0, vec![path_matcher("/api"), method_matcher("DELETE")]),
        ];
        let outcome = resolve(
            &mappings,
            &make_request("GET", "http://localhost/api"),
            &MatchContext::detached(),
            &ScenarioSnapshot::default(),
        );
        match outcome {
            ResolveOutcome::NoMatch {
                closest: Some((mapping, result)),
            } => {
                assert_eq!(mapping.title(), Some("near"));
                assert_eq!(result.total, 0.5);
                assert_eq!(result.scores.len(), 2);
                assert_eq!(result.scores[0].matcher, "path");
            }
            other => panic!("Expected closest miss, got {other:?}"),
        }
    }

    #[test]
    fn test_no_mappings() {
        let outcome = resolve(
            &[],
            &make_request("GET", "http://localhost/"),
            &MatchContext::detached(),
            &ScenarioSnapshot::default(),
        );
        assert!(matches!(outcome, ResolveOutcome::NoMatch { closest: None }));
        assert!(outcome.result().is_none());
    }

    #[test]
    fn test_scenario_precondition_adds_score() {
        let mapping = Arc::new(Mapping::compile(&MappingDefinition {
            id: None,
            title: Some("paid".to_string()),
            priority: 0,
            request: vec![path_matcher("/order")],
            response: ResponseDefinition::default(),
            scenario: Some(ScenarioDefinition {
                name: "checkout".to_string(),
                required_state: Some("Paid".to_string()),
                new_state: None,
            }),
        }));
        let request = make_request("GET", "http://localhost/order");
        let store = ScenarioStore::new();

        let result = evaluate(&mapping, &request, &MatchContext::detached(), &store.snapshot());
        assert_eq!(result.total, 0.5);
        assert_eq!(result.scores[1].matcher, "scenario:checkout");

        store.set("checkout", "Paid");
        let result = evaluate(&mapping, &request, &MatchContext::detached(), &store.snapshot());
        assert!(result.is_perfect());
    }
}
