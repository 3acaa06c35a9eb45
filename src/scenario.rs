//! Named scenario states.
//!
//! A mapping can require its scenario to be in a given state and move it to
//! a new one when served. Scenarios nobody has touched are in [`STARTED`].

use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::info;

/// Initial state of every scenario.
pub const STARTED: &str = "Started";

/// Current state of every scenario.
#[derive(Debug, Default)]
pub struct ScenarioStore {
    states: RwLock<HashMap<String, String>>,
}

impl ScenarioStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state of a scenario.
    pub fn get(&self, name: &str) -> String {
        self.states
            .read()
            .get(name)
            .cloned()
            .unwrap_or_else(|| STARTED.to_string())
    }

    /// Move a scenario to `state`.
    pub fn set(&self, name: &str, state: &str) {
        let previous = self.states.write().insert(name.to_string(), state.to_string());
        info!(
            scenario = %name,
            from = %previous.as_deref().unwrap_or(STARTED),
            to = %state,
            "Scenario state changed"
        );
    }

    /// Put every scenario back to its initial state.
    pub fn reset(&self) {
        self.states.write().clear();
    }

    /// Point-in-time copy used for one resolution.
    pub fn snapshot(&self) -> ScenarioSnapshot {
        ScenarioSnapshot {
            states: self.states.read().clone(),
        }
    }
}

/// Immutable copy of scenario states.
#[derive(Debug, Clone, Default)]
pub struct ScenarioSnapshot {
    states: HashMap<String, String>,
}

impl ScenarioSnapshot {
    pub fn state(&self, name: &str) -> &str {
        self.states.get(name).map(String::as_str).unwrap_or(STARTED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_scenario_is_started() {
        let store = ScenarioStore::new();
        assert_eq!(store.get("checkout"), STARTED);
        assert_eq!(store.snapshot().state("checkout"), STARTED);
    }

    #[test]
    fn test_snapshot_is_isolated_from_later_changes() {
        let store = ScenarioStore::new();
        store.set("checkout", "Paid");
        let snapshot = store.snapshot();
        store.set("checkout", "Shipped");

        assert_eq!(snapshot.state("checkout"), "Paid");
        assert_eq!(store.get("checkout"), "Shipped");
    }

    #[test]
    fn test_reset() {
        let store = ScenarioStore::new();
        store.set("checkout", "Paid");
        store.reset();
        assert_eq!(store.get("checkout"), STARTED);
    }
}
