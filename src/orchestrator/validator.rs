//! Route validation: ownership sanity and base governance.

use uuid::Uuid;

use super::router::RouteResult;
use crate::error::{AioxError, Result};
use crate::governance::GovernancePolicy;
use crate::xmpp::domain_part;

pub struct Validator;

impl Validator {
    pub fn new() -> Self {
        Self
    }

    /// Check that a resolved route may be processed at all.
    pub fn validate(&self, route: &RouteResult) -> Result<()> {
        if route.agent_id == Uuid::nil() {
            return Err(AioxError::Unauthorized("agent not found".to_string()));
        }
        if route.owner_user_id == Uuid::nil() {
            return Err(AioxError::Unauthorized("agent has no owner".to_string()));
        }
        self.check_governance(route)
    }

    fn check_governance(&self, route: &RouteResult) -> Result<()> {
        let policy = GovernancePolicy::parse(&route.governance);

        if policy.blocked {
            return Err(AioxError::Unauthorized(
                "agent is blocked by governance policy".to_string(),
            ));
        }

        if !policy.allowed_domains.is_empty() {
            let domain = domain_part(&route.agent_address);
            if !policy.domain_allowed(domain) {
                return Err(AioxError::Unauthorized(format!(
                    "agent address domain {:?} not in allowed domains",
                    domain
                )));
            }
        }

        Ok(())
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}
