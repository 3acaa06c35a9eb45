//! Mappings and the registry holding them.

use crate::config::{MappingDefinition, ResponseDefinition, ScenarioDefinition};
use crate::matcher::RequestMatcher;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// A registered mapping: compiled matchers plus the response to produce.
#[derive(Debug, Clone)]
pub struct Mapping {
    id: Uuid,
    title: Option<String>,
    priority: i32,
    matchers: Vec<RequestMatcher>,
    scenario: Option<ScenarioDefinition>,
    response: ResponseDefinition,
}

impl Mapping {
    /// Compile a definition. A missing id is generated.
    pub fn compile(definition: &MappingDefinition) -> Self {
        Self {
            id: definition.id.unwrap_or_else(Uuid::new_v4),
            title: definition.title.clone(),
            priority: definition.priority,
            matchers: definition.request.iter().map(RequestMatcher::compile).collect(),
            scenario: definition.scenario.clone(),
            response: definition.response.clone(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn matchers(&self) -> &[RequestMatcher] {
        &self.matchers
    }

    pub fn scenario(&self) -> Option<&ScenarioDefinition> {
        self.scenario.as_ref()
    }

    pub fn response(&self) -> &ResponseDefinition {
        &self.response
    }

    /// Label for log lines.
    pub fn label(&self) -> String {
        match &self.title {
            Some(title) => format!("{} ({})", title, self.id),
            None => self.id.to_string(),
        }
    }
}

/// Active mappings in registration order.
///
/// Readers take a cheap snapshot; writers rebuild the list and swap it in,
/// so a resolution in progress never sees a half-applied change.
#[derive(Debug, Default)]
pub struct MappingRegistry {
    mappings: RwLock<Arc<Vec<Arc<Mapping>>>>,
}

impl MappingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from definitions, in order.
    pub fn from_definitions(definitions: &[MappingDefinition]) -> Self {
        let registry = Self::new();
        for definition in definitions {
            registry.register(Mapping::compile(definition));
        }
        registry
    }

    /// Add a mapping, or replace the one with the same id in place.
    pub fn register(&self, mapping: Mapping) -> Arc<Mapping> {
        let mapping = Arc::new(mapping);
        let mut guard = self.mappings.write();
        let mut next = guard.as_ref().clone();
        match next.iter().position(|m| m.id == mapping.id) {
            Some(idx) => {
                next[idx] = Arc::clone(&mapping);
                info!(mapping = %mapping.label(), "Mapping replaced");
            }
            None => {
                next.push(Arc::clone(&mapping));
                info!(mapping = %mapping.label(), priority = mapping.priority, "Mapping registered");
            }
        }
        *guard = Arc::new(next);
        mapping
    }

    /// Remove a mapping by id.
    pub fn remove(&self, id: &Uuid) -> Option<Arc<Mapping>> {
        let mut guard = self.mappings.write();
        let idx = guard.iter().position(|m| m.id == *id)?;
        let mut next = guard.as_ref().clone();
        let removed = next.remove(idx);
        *guard = Arc::new(next);
        info!(mapping = %removed.label(), "Mapping removed");
        Some(removed)
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<Mapping>> {
        self.mappings.read().iter().find(|m| m.id == *id).cloned()
    }

    pub fn clear(&self) {
        *self.mappings.write() = Arc::new(Vec::new());
        info!("All mappings removed");
    }

    pub fn len(&self) -> usize {
        self.mappings.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current mappings in registration order.
    pub fn snapshot(&self) -> Arc<Vec<Arc<Mapping>>> {
        Arc::clone(&self.mappings.read())
    }
}
