//! Structured record of what a step changed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Human-readable record of one step application.
///
/// Serializes flat: `{"operation": "Remove Duplicates", "rows_removed": 3, ...}`.
/// Exactly one is produced per step call, including calls that change nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeMetadata {
    pub operation: String,
    #[serde(flatten)]
    pub facts: Map<String, Value>,
}

impl ChangeMetadata {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            facts: Map::new(),
        }
    }

    /// Builder-style [`ChangeMetadata::insert`].
    pub fn with(mut self, key: &str, value: Value) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: &str, value: Value) {
        self.facts.insert(key.to_string(), value);
    }

    pub fn fact(&self, key: &str) -> Option<&Value> {
        self.facts.get(key)
    }

    /// Record a per-column note under the `details` fact.
    pub fn detail(&mut self, column: &str, note: impl Into<String>) {
        let details = self
            .facts
            .entry("details")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(map) = details {
            map.insert(column.to_string(), Value::String(note.into()));
        }
    }

    /// The `rows_removed` fact, if this step reports one.
    pub fn rows_removed(&self) -> Option<u64> {
        self.fact("rows_removed").and_then(Value::as_u64)
    }
}
