//! Agent persistence.
//!
//! Every read filters soft-deleted rows; a deleted agent is indistinguishable
//! from a missing one anywhere above this layer.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use deadpool_postgres::Pool;
use uuid::Uuid;

use super::model::Agent;
use crate::error::Result;

#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn create(&self, agent: &Agent) -> Result<()>;
    async fn get_by_id(&self, id: Uuid) -> Result<Option<Agent>>;
    async fn list_by_owner(&self, owner: Uuid, limit: i64, offset: i64) -> Result<Vec<Agent>>;
    async fn count_by_owner(&self, owner: Uuid) -> Result<i64>;
    /// Returns false when the agent does not exist, is already deleted, or
    /// belongs to someone else.
    async fn soft_delete(&self, id: Uuid, owner: Uuid) -> Result<bool>;
}

const AGENT_COLUMNS: &str = "id, owner_user_id, address, name, description, system_prompt, \
     llm_config, memory_policy, governance, visibility, created_at, updated_at, deleted_at";

/// PostgreSQL-backed store over the `agents` table.
pub struct PostgresAgentStore {
    pool: Pool,
}

impl PostgresAgentStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    fn row_to_agent(row: &tokio_postgres::Row) -> Agent {
        Agent {
            id: row.get(0),
            owner_user_id: row.get(1),
            address: row.get(2),
            name: row.get(3),
            description: row.get(4),
            system_prompt: row.get(5),
            llm_config: row.get(6),
            memory_policy: row.get(7),
            governance: row.get(8),
            visibility: row.get(9),
            created_at: row.get(10),
            updated_at: row.get(11),
            deleted_at: row.get(12),
        }
    }
}

#[async_trait]
impl AgentStore for PostgresAgentStore {
    async fn create(&self, agent: &Agent) -> Result<()> {
        let conn = self.pool.get().await?;
        conn.execute(
            "INSERT INTO agents (id, owner_user_id, address, name, description, system_prompt, \
             llm_config, memory_policy, governance, visibility, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            &[
                &agent.id,
                &agent.owner_user_id,
                &agent.address,
                &agent.name,
                &agent.description,
                &agent.system_prompt,
                &agent.llm_config,
                &agent.memory_policy,
                &agent.governance,
                &agent.visibility,
                &agent.created_at,
                &agent.updated_at,
            ],
        )
        .await?;
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Agent>> {
        let conn = self.pool.get().await?;
        let query = format!(
            "SELECT {} FROM agents WHERE id = $1 AND deleted_at IS NULL",
            AGENT_COLUMNS
        );
        let row = conn.query_opt(query.as_str(), &[&id]).await?;
        Ok(row.as_ref().map(Self::row_to_agent))
    }

    async fn list_by_owner(&self, owner: Uuid, limit: i64, offset: i64) -> Result<Vec<Agent>> {
        let conn = self.pool.get().await?;
        let query = format!(
            "SELECT {} FROM agents \
             WHERE owner_user_id = $1 AND deleted_at IS NULL \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3",
            AGENT_COLUMNS
        );
        let rows = conn.query(query.as_str(), &[&owner, &limit, &offset]).await?;
        Ok(rows.iter().map(Self::row_to_agent).collect())
    }

    async fn count_by_owner(&self, owner: Uuid) -> Result<i64> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_one(
                "SELECT COUNT(*) FROM agents WHERE owner_user_id = $1 AND deleted_at IS NULL",
                &[&owner],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn soft_delete(&self, id: Uuid, owner: Uuid) -> Result<bool> {
        let conn = self.pool.get().await?;
        let affected = conn
            .execute(
                "UPDATE agents SET deleted_at = NOW(), updated_at = NOW() \
                 WHERE id = $1 AND owner_user_id = $2 AND deleted_at IS NULL",
                &[&id, &owner],
            )
            .await?;
        Ok(affected > 0)
    }
}

/// In-memory store for the embedded mode and tests.
#[derive(Default)]
pub struct MemoryAgentStore {
    agents: Mutex<HashMap<Uuid, Agent>>,
}

impl MemoryAgentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentStore for MemoryAgentStore {
    async fn create(&self, agent: &Agent) -> Result<()> {
        self.agents
            .lock()
            .unwrap()
            .insert(agent.id, agent.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Agent>> {
        Ok(self
            .agents
            .lock()
            .unwrap()
            .get(&id)
            .filter(|a| a.deleted_at.is_none())
            .cloned())
    }

    async fn list_by_owner(&self, owner: Uuid, limit: i64, offset: i64) -> Result<Vec<Agent>> {
        let agents = self.agents.lock().unwrap();
        let mut matched: Vec<Agent> = agents
            .values()
            .filter(|a| a.owner_user_id == owner && a.deleted_at.is_none())
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count_by_owner(&self, owner: Uuid) -> Result<i64> {
        let agents = self.agents.lock().unwrap();
        Ok(agents
            .values()
            .filter(|a| a.owner_user_id == owner && a.deleted_at.is_none())
            .count() as i64)
    }

    async fn soft_delete(&self, id: Uuid, owner: Uuid) -> Result<bool> {
        let mut agents = self.agents.lock().unwrap();
        match agents.get_mut(&id) {
            Some(agent) if agent.owner_user_id == owner && agent.deleted_at.is_none() => {
                agent.deleted_at = Some(Utc::now());
                agent.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
