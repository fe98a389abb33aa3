//! Configuration validation, run once before startup.

use super::types::Config;
use crate::error::{AioxError, Result};

impl Config {
    /// Reject configurations that cannot possibly run.
    pub fn validate(&self) -> Result<()> {
        let key = self.encryption.key.trim();
        if key.len() != 64 || !key.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(AioxError::Config(
                "encryption.key must be 64 hex characters (AES-256)".to_string(),
            ));
        }
        if self.xmpp.domain.trim().is_empty() {
            return Err(AioxError::Config("xmpp.domain must not be empty".to_string()));
        }
        if self.governance.max_tokens_per_day <= 0
            || self.governance.max_tokens_per_minute <= 0
            || self.governance.max_requests_per_day <= 0
        {
            return Err(AioxError::Config(
                "governance limits must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        let mut cfg = Config::default();
        cfg.encryption.key = "ab".repeat(32);
        cfg
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_missing_encryption_key_rejected() {
        let cfg = Config::default();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_short_key_rejected() {
        let mut cfg = valid();
        cfg.encryption.key = "abcd".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_non_hex_key_rejected() {
        let mut cfg = valid();
        cfg.encryption.key = "zz".repeat(32);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_empty_domain_rejected() {
        let mut cfg = valid();
        cfg.xmpp.domain = "  ".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_nonpositive_governance_rejected() {
        let mut cfg = valid();
        cfg.governance.max_requests_per_day = 0;
        assert!(cfg.validate().is_err());
    }
}
