//! Per-agent memory policy.

use serde::{Deserialize, Serialize};

/// Memory settings parsed from the agent's `memory_policy` JSONB document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryPolicy {
    /// Master switch; when false the dispatch path skips memory entirely.
    pub enabled: bool,
    pub short_term_enabled: bool,
    pub long_term_enabled: bool,
    pub max_short_term_msgs: usize,
    pub short_term_ttl_sec: u64,
    pub max_long_term_results: usize,
    pub similarity_threshold: f64,
}

impl Default for MemoryPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            short_term_enabled: true,
            long_term_enabled: true,
            max_short_term_msgs: 20,
            short_term_ttl_sec: 3600,
            max_long_term_results: 5,
            similarity_threshold: 0.7,
        }
    }
}

impl MemoryPolicy {
    /// Parse the policy document. Null, empty, or malformed input yields the
    /// defaults; a partial document overlays them.
    pub fn parse(value: &serde_json::Value) -> Self {
        if value.is_null() {
            return Self::default();
        }
        serde_json::from_value(value.clone()).unwrap_or_default()
    }
}
