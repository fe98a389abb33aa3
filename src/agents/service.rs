//! Agent registry service.
//!
//! Owns address minting and the encryption boundary: system prompts are
//! sealed on the way in and only opened by [`Service::decrypt_system_prompt`]
//! at dispatch time.

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use super::model::{Agent, CreateAgentRequest};
use super::store::AgentStore;
use crate::crypto::PromptCipher;
use crate::error::{AioxError, Result};

pub struct Service {
    store: Arc<dyn AgentStore>,
    cipher: PromptCipher,
    xmpp_domain: String,
}

impl Service {
    pub fn new(store: Arc<dyn AgentStore>, encryption_key: &str, xmpp_domain: &str) -> Result<Self> {
        Ok(Self {
            store,
            cipher: PromptCipher::new(encryption_key)?,
            xmpp_domain: xmpp_domain.to_string(),
        })
    }

    /// Register a new agent for `owner`. Mints the id and address and seals
    /// the system prompt before anything is persisted.
    pub async fn create(&self, owner: Uuid, req: &CreateAgentRequest) -> Result<Agent> {
        if req.name.trim().is_empty() {
            return Err(AioxError::Config("agent name must not be empty".into()));
        }
        if req.system_prompt.is_empty() {
            return Err(AioxError::Config("system prompt must not be empty".into()));
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        let agent = Agent {
            id,
            owner_user_id: owner,
            address: format!("agent-{}@agents.{}", id, self.xmpp_domain),
            name: req.name.clone(),
            description: req.description.clone(),
            system_prompt: self.cipher.encrypt(&req.system_prompt)?,
            llm_config: req.llm_config.clone(),
            memory_policy: req.memory_policy.clone(),
            governance: req.governance.clone(),
            visibility: req
                .visibility
                .clone()
                .unwrap_or_else(|| "private".to_string()),
            created_at: now,
            updated_at: now,
            deleted_at: None,
        };
        self.store.create(&agent).await?;
        Ok(agent)
    }

    /// Look up an agent by id. Soft-deleted agents read as missing.
    pub async fn get_by_id(&self, id: Uuid) -> Result<Option<Agent>> {
        self.store.get_by_id(id).await
    }

    pub async fn list_by_owner(&self, owner: Uuid, limit: i64, offset: i64) -> Result<Vec<Agent>> {
        self.store.list_by_owner(owner, limit, offset).await
    }

    pub async fn count_by_owner(&self, owner: Uuid) -> Result<i64> {
        self.store.count_by_owner(owner).await
    }

    /// Soft-delete an owner's agent.
    pub async fn delete(&self, id: Uuid, owner: Uuid) -> Result<()> {
        if self.store.soft_delete(id, owner).await? {
            Ok(())
        } else {
            Err(AioxError::NotFound(format!("agent {}", id)))
        }
    }

    /// Open the sealed system prompt. The ciphertext never leaves this
    /// process boundary.
    pub fn decrypt_system_prompt(&self, agent: &Agent) -> Result<String> {
        self.cipher.decrypt(&agent.system_prompt)
    }
}
