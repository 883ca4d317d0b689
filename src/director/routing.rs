//! Intent routing for the Director.
//!
//! A static table mapping each intent type to the ordered set of candidate
//! agents. Candidates are filtered against discovery before fan-out; the
//! table itself never consults liveness.

use std::collections::HashMap;

/// Static intent-type to candidate-agents mapping.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    routes: HashMap<String, Vec<String>>,
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new()
            .with_route("greeting", &[])
            .with_route("help_request", &["Task"])
            .with_route("status_query", &["Task", "Calendar"])
            .with_route("calendar_query", &["Calendar"])
            .with_route("email_query", &["Email"])
            .with_route("task_management", &["Task"])
            .with_route("web_search", &["Browser"])
            .with_route("memory_recall", &["Memory"])
            .with_route("general_query", &["Memory"])
    }
}

impl RoutingTable {
    /// Empty table. Use [`RoutingTable::default`] for the assistant mapping.
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    /// Add or replace the candidate set for an intent type.
    pub fn with_route(mut self, intent_type: impl Into<String>, candidates: &[&str]) -> Self {
        self.routes.insert(
            intent_type.into(),
            candidates.iter().map(|c| c.to_string()).collect(),
        );
        self
    }

    /// Ordered candidates for an intent type; empty for unknown intents.
    pub fn candidates(&self, intent_type: &str) -> &[String] {
        self.routes
            .get(intent_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// All known intent types, sorted.
    pub fn intent_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        types.sort();
        types
    }
}
