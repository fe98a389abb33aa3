//! Per-agent governance policy.
//!
//! Governance is stored as a JSONB document on the agent record. Parsing is
//! permissive: a null, empty, or malformed document yields the default
//! (unrestricted) policy, and partial documents overlay the defaults.

pub mod audit;
pub mod quota;

use serde::{Deserialize, Serialize};

/// Structured governance rules for one agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernancePolicy {
    /// A blocked agent never reaches a worker.
    pub blocked: bool,
    /// When non-empty, the agent's configured LLM provider must be listed
    /// (case-insensitive).
    pub allowed_providers: Vec<String>,
    /// When non-empty, the domain of the agent address must be listed
    /// (case-insensitive).
    pub allowed_domains: Vec<String>,
    /// Per-request token ceiling handed to the worker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens_per_request: Option<i64>,
}

impl GovernancePolicy {
    /// Parse a governance JSONB value. Null/invalid input returns defaults.
    pub fn parse(value: &serde_json::Value) -> Self {
        if value.is_null() {
            return Self::default();
        }
        serde_json::from_value(value.clone()).unwrap_or_default()
    }

    pub fn provider_allowed(&self, provider: &str) -> bool {
        self.allowed_providers.is_empty()
            || self
                .allowed_providers
                .iter()
                .any(|p| p.eq_ignore_ascii_case(provider))
    }

    pub fn domain_allowed(&self, domain: &str) -> bool {
        self.allowed_domains.is_empty()
            || self
                .allowed_domains
                .iter()
                .any(|d| d.eq_ignore_ascii_case(domain))
    }
}

/// Pull the `provider` field out of an agent's LLM config document.
pub fn extract_provider(llm_config: &serde_json::Value) -> Option<String> {
    llm_config
        .get("provider")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_null_returns_default() {
        let policy = GovernancePolicy::parse(&serde_json::Value::Null);
        assert!(!policy.blocked);
        assert!(policy.allowed_providers.is_empty());
        assert!(policy.allowed_domains.is_empty());
    }

    #[test]
    fn test_parse_partial_overlays_defaults() {
        let policy = GovernancePolicy::parse(&json!({"blocked": true}));
        assert!(policy.blocked);
        assert!(policy.allowed_providers.is_empty());
    }

    #[test]
    fn test_parse_malformed_returns_default() {
        let policy = GovernancePolicy::parse(&json!({"blocked": "not-a-bool"}));
        assert!(!policy.blocked);
    }

    #[test]
    fn test_provider_allowed_case_insensitive() {
        let policy = GovernancePolicy::parse(&json!({"allowed_providers": ["OpenAI", "anthropic"]}));
        assert!(policy.provider_allowed("openai"));
        assert!(policy.provider_allowed("ANTHROPIC"));
        assert!(!policy.provider_allowed("mistral"));
    }

    #[test]
    fn test_empty_provider_list_allows_all() {
        let policy = GovernancePolicy::default();
        assert!(policy.provider_allowed("anything"));
    }

    #[test]
    fn test_domain_allowed_case_insensitive() {
        let policy = GovernancePolicy::parse(&json!({"allowed_domains": ["Agents.Example.Org"]}));
        assert!(policy.domain_allowed("agents.example.org"));
        assert!(!policy.domain_allowed("other.example.org"));
    }

    #[test]
    fn test_extract_provider() {
        assert_eq!(
            extract_provider(&json!({"provider": "openai", "model": "gpt-4o"})),
            Some("openai".to_string())
        );
        assert_eq!(extract_provider(&json!({"model": "gpt-4o"})), None);
        assert_eq!(extract_provider(&json!({"provider": ""})), None);
        assert_eq!(extract_provider(&serde_json::Value::Null), None);
    }
}
