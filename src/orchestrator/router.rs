//! Address routing: resolve a stanza's to-address to an agent.

use std::sync::Arc;

use uuid::Uuid;

use crate::agents;
use crate::error::Result;
use crate::xmpp::parse_agent_address;

/// The resolved target of an inbound message.
#[derive(Debug, Clone)]
pub struct RouteResult {
    pub agent_id: Uuid,
    pub owner_user_id: Uuid,
    pub agent_name: String,
    pub agent_address: String,
    pub visibility: String,
    pub governance: serde_json::Value,
}

pub struct Router {
    agents: Arc<agents::Service>,
}

impl Router {
    pub fn new(agents: Arc<agents::Service>) -> Self {
        Self { agents }
    }

    /// Resolve a to-address. `Ok(None)` covers every deterministic routing
    /// failure (malformed address, unknown agent, soft-deleted agent);
    /// `Err` is reserved for transient store trouble.
    pub async fn route(&self, to_address: &str) -> Result<Option<RouteResult>> {
        let agent_id = match parse_agent_address(to_address) {
            Ok(id) => id,
            Err(_) => return Ok(None),
        };

        Ok(self.agents.get_by_id(agent_id).await?.map(|agent| RouteResult {
            agent_id: agent.id,
            owner_user_id: agent.owner_user_id,
            agent_name: agent.name,
            agent_address: agent.address,
            visibility: agent.visibility,
            governance: agent.governance,
        }))
    }
}
