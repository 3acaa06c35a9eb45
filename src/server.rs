//! Mock server pipeline.
//!
//! Resolves each request against the registered mappings, renders the
//! response, and records the outcome in the request log.

use crate::config::{GlobalSettings, MockServerConfig, ResponseDefinition};
use crate::error::MockError;
use crate::log::{LogEntry, RequestLog};
use crate::mapping::{Mapping, MappingRegistry};
use crate::matcher::MatchContext;
use crate::request::RequestMessage;
use crate::resolver::{resolve, ResolveOutcome};
use crate::response::{ResponseMaterializer, ResponseMessage};
use crate::scenario::ScenarioStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Mock server
///
/// Owns the mapping registry, request log and scenario states, and turns
/// inbound requests into responses.
pub struct MockServer {
    settings: GlobalSettings,
    default_response: Option<ResponseDefinition>,
    registry: MappingRegistry,
    log: RequestLog,
    scenarios: ScenarioStore,
    materializer: ResponseMaterializer,
    /// Total requests processed.
    requests_total: AtomicU64,
    /// Total requests matched to mappings.
    requests_matched: AtomicU64,
    /// Total requests unmatched.
    requests_unmatched: AtomicU64,
    /// Requests whose response could not be built.
    requests_failed: AtomicU64,
}

impl MockServer {
    /// Create a new mock server with the given configuration.
    pub fn new(config: MockServerConfig) -> Self {
        for problem in config.diagnostics() {
            warn!(problem = %problem, "Mapping will never match");
        }

        let registry = MappingRegistry::from_definitions(&config.mappings);

        info!(
            mappings = registry.len(),
            max_log_entries = config.settings.max_log_entries,
            "Mock server initialized"
        );

        Self {
            log: RequestLog::new(config.settings.max_log_entries),
            materializer: ResponseMaterializer::new(config.settings.default_content_type.clone()),
            settings: config.settings,
            default_response: config.default_response,
            registry,
            scenarios: ScenarioStore::new(),
            requests_total: AtomicU64::new(0),
            requests_matched: AtomicU64::new(0),
            requests_unmatched: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
        }
    }

    /// Create from a YAML configuration string.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        Ok(Self::new(MockServerConfig::from_yaml(yaml)?))
    }

    pub fn settings(&self) -> &GlobalSettings {
        &self.settings
    }

    pub fn registry(&self) -> &MappingRegistry {
        &self.registry
    }

    pub fn log(&self) -> &RequestLog {
        &self.log
    }

    pub fn scenarios(&self) -> &ScenarioStore {
        &self.scenarios
    }

    /// Get total requests processed.
    pub fn total_requests(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    /// Get total requests matched.
    pub fn total_matched(&self) -> u64 {
        self.requests_matched.load(Ordering::Relaxed)
    }

    /// Get total requests unmatched.
    pub fn total_unmatched(&self) -> u64 {
        self.requests_unmatched.load(Ordering::Relaxed)
    }

    /// Get total requests whose response failed.
    pub fn total_failed(&self) -> u64 {
        self.requests_failed.load(Ordering::Relaxed)
    }

    /// Resolve a request seeing only history logged before `as_of`.
    pub fn resolve(&self, request: &RequestMessage, as_of: u64) -> ResolveOutcome {
        let ctx = MatchContext {
            history: &self.log,
            as_of,
            admin_root: &self.settings.admin_root,
            mappings_prefix: &self.settings.mappings_prefix,
        };
        resolve(
            &self.registry.snapshot(),
            request,
            &ctx,
            &self.scenarios.snapshot(),
        )
    }

    /// Handle one request end to end.
    ///
    /// The request is logged whatever happens. A response that cannot be
    /// built is logged without a response and returned as an error, for the
    /// transport to answer with a server error.
    pub async fn handle(&self, request: RequestMessage) -> Result<Arc<LogEntry>, MockError> {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        let sequence = self.log.next_sequence();
        let request = Arc::new(request);

        let outcome = self.resolve(&request, sequence);
        let scores = outcome.result().map(|r| r.scores.clone()).unwrap_or_default();

        let (mapping_id, produced) = match &outcome {
            ResolveOutcome::Matched { mapping, .. } => {
                self.requests_matched.fetch_add(1, Ordering::Relaxed);
                if self.settings.log_matches {
                    info!(
                        mapping = %mapping.label(),
                        method = %request.method(),
                        path = %request.path(),
                        "Request matched mapping"
                    );
                }
                (Some(mapping.id()), self.respond_matched(mapping, &request).await)
            }
            ResolveOutcome::NoMatch { closest } => {
                self.requests_unmatched.fetch_add(1, Ordering::Relaxed);
                if self.settings.log_unmatched {
                    match closest {
                        Some((mapping, result)) => warn!(
                            method = %request.method(),
                            path = %request.path(),
                            closest = %mapping.label(),
                            score = result.total,
                            "No matching mapping found"
                        ),
                        None => warn!(
                            method = %request.method(),
                            path = %request.path(),
                            "No matching mapping found"
                        ),
                    }
                }
                (None, self.respond_unmatched(&request).await)
            }
        };

        let (response, error) = match produced {
            Ok(response) => (Some(response), None),
            Err(e) => {
                self.requests_failed.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, path = %request.path(), "Failed to build response");
                (None, Some(e))
            }
        };

        let entry = self.log.append(LogEntry {
            id: Uuid::new_v4(),
            sequence,
            timestamp: chrono::Utc::now(),
            request,
            response,
            mapping_id,
            scores,
        });

        match error {
            Some(e) => Err(e),
            None => Ok(entry),
        }
    }

    async fn respond_matched(
        &self,
        mapping: &Mapping,
        request: &RequestMessage,
    ) -> Result<ResponseMessage, MockError> {
        apply_delay(mapping.response(), &mapping.label()).await;
        let response = self
            .materializer
            .materialize(mapping.id(), mapping.response(), request)?;

        if let Some(scenario) = mapping.scenario() {
            if let Some(next) = &scenario.new_state {
                self.scenarios.set(&scenario.name, next);
            }
        }
        Ok(response)
    }

    async fn respond_unmatched(&self, request: &RequestMessage) -> Result<ResponseMessage, MockError> {
        match &self.default_response {
            Some(default) => {
                apply_delay(default, "default_response").await;
                self.materializer.materialize(Uuid::nil(), default, request)
            }
            None => Ok(ResponseMessage::not_found()),
        }
    }
}

async fn apply_delay(response: &ResponseDefinition, label: &str) {
    if let Some(delay) = &response.delay {
        let delay_ms = delay.calculate();
        if delay_ms > 0 {
            debug!(mapping = %label, delay_ms, "Applying delay");
            tokio::time::sleep(tokio::time::Duration::from_millis(delay_ms)).await;
        }
    }
}
