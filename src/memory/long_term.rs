//! Long-term vector memory.
//!
//! Rows live in `agent_memories` with a pgvector column and a cosine index.
//! Scoping both `owner_user_id` and `agent_id` into every predicate is a
//! security invariant: no query shape exists that can cross tenants.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use deadpool_postgres::Pool;
use pgvector::Vector;
use uuid::Uuid;

use super::model::{Memory, SearchResult};
use crate::error::Result;

#[async_trait]
pub trait LongTermStore: Send + Sync {
    async fn create(&self, memory: &Memory) -> Result<()>;

    /// Rows within `threshold` cosine similarity of `embedding`, closest
    /// first, capped at `limit`. Rows without an embedding never match.
    async fn search_similar(
        &self,
        owner: Uuid,
        agent: Uuid,
        embedding: &[f32],
        limit: usize,
        threshold: f64,
    ) -> Result<Vec<SearchResult>>;

    async fn list_by_agent(
        &self,
        owner: Uuid,
        agent: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Memory>>;
    async fn count_by_agent(&self, owner: Uuid, agent: Uuid) -> Result<i64>;
    async fn get_by_id(&self, owner: Uuid, id: Uuid) -> Result<Option<Memory>>;
    async fn delete(&self, owner: Uuid, id: Uuid) -> Result<bool>;
    async fn delete_by_agent(&self, owner: Uuid, agent: Uuid) -> Result<u64>;
}

/// PostgreSQL + pgvector store.
pub struct PostgresLongTermStore {
    pool: Pool,
}

impl PostgresLongTermStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    fn row_to_memory(row: &tokio_postgres::Row) -> Memory {
        Memory {
            id: row.get(0),
            owner_user_id: row.get(1),
            agent_id: row.get(2),
            content: row.get(3),
            embedding: None,
            memory_type: row.get(4),
            metadata: row.get(5),
            created_at: row.get(6),
        }
    }
}

#[async_trait]
impl LongTermStore for PostgresLongTermStore {
    async fn create(&self, memory: &Memory) -> Result<()> {
        let conn = self.pool.get().await?;
        match &memory.embedding {
            Some(embedding) if !embedding.is_empty() => {
                let vector = Vector::from(embedding.clone());
                conn.execute(
                    "INSERT INTO agent_memories \
                     (id, owner_user_id, agent_id, content, embedding, memory_type, metadata, created_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
                    &[
                        &memory.id,
                        &memory.owner_user_id,
                        &memory.agent_id,
                        &memory.content,
                        &vector,
                        &memory.memory_type,
                        &memory.metadata,
                        &memory.created_at,
                    ],
                )
                .await?;
            }
            _ => {
                conn.execute(
                    "INSERT INTO agent_memories \
                     (id, owner_user_id, agent_id, content, memory_type, metadata, created_at) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7)",
                    &[
                        &memory.id,
                        &memory.owner_user_id,
                        &memory.agent_id,
                        &memory.content,
                        &memory.memory_type,
                        &memory.metadata,
                        &memory.created_at,
                    ],
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn search_similar(
        &self,
        owner: Uuid,
        agent: Uuid,
        embedding: &[f32],
        limit: usize,
        threshold: f64,
    ) -> Result<Vec<SearchResult>> {
        let conn = self.pool.get().await?;
        let vector = Vector::from(embedding.to_vec());
        let rows = conn
            .query(
                "SELECT id, owner_user_id, agent_id, content, memory_type, metadata, created_at, \
                        1 - (embedding <=> $1) AS similarity \
                 FROM agent_memories \
                 WHERE owner_user_id = $2 AND agent_id = $3 \
                   AND embedding IS NOT NULL \
                   AND 1 - (embedding <=> $1) >= $4 \
                 ORDER BY embedding <=> $1 \
                 LIMIT $5",
                &[&vector, &owner, &agent, &threshold, &(limit as i64)],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| SearchResult {
                memory: Self::row_to_memory(row),
                similarity: row.get(7),
            })
            .collect())
    }

    async fn list_by_agent(
        &self,
        owner: Uuid,
        agent: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Memory>> {
        let conn = self.pool.get().await?;
        let rows = conn
            .query(
                "SELECT id, owner_user_id, agent_id, content, memory_type, metadata, created_at \
                 FROM agent_memories \
                 WHERE owner_user_id = $1 AND agent_id = $2 \
                 ORDER BY created_at DESC LIMIT $3 OFFSET $4",
                &[&owner, &agent, &limit, &offset],
            )
            .await?;
        Ok(rows.iter().map(Self::row_to_memory).collect())
    }

    async fn count_by_agent(&self, owner: Uuid, agent: Uuid) -> Result<i64> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_one(
                "SELECT COUNT(*) FROM agent_memories WHERE owner_user_id = $1 AND agent_id = $2",
                &[&owner, &agent],
            )
            .await?;
        Ok(row.get(0))
    }

    async fn get_by_id(&self, owner: Uuid, id: Uuid) -> Result<Option<Memory>> {
        let conn = self.pool.get().await?;
        let row = conn
            .query_opt(
                "SELECT id, owner_user_id, agent_id, content, memory_type, metadata, created_at \
                 FROM agent_memories WHERE id = $1 AND owner_user_id = $2",
                &[&id, &owner],
            )
            .await?;
        Ok(row.as_ref().map(Self::row_to_memory))
    }

    async fn delete(&self, owner: Uuid, id: Uuid) -> Result<bool> {
        let conn = self.pool.get().await?;
        let affected = conn
            .execute(
                "DELETE FROM agent_memories WHERE id = $1 AND owner_user_id = $2",
                &[&id, &owner],
            )
            .await?;
        Ok(affected > 0)
    }

    async fn delete_by_agent(&self, owner: Uuid, agent: Uuid) -> Result<u64> {
        let conn = self.pool.get().await?;
        let affected = conn
            .execute(
                "DELETE FROM agent_memories WHERE owner_user_id = $1 AND agent_id = $2",
                &[&owner, &agent],
            )
            .await?;
        Ok(affected)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64) * (*x as f64);
        norm_b += (*y as f64) * (*y as f64);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

/// In-process store with brute-force cosine search.
#[derive(Default)]
pub struct MemoryLongTermStore {
    rows: Mutex<HashMap<Uuid, Memory>>,
}

impl MemoryLongTermStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LongTermStore for MemoryLongTermStore {
    async fn create(&self, memory: &Memory) -> Result<()> {
        self.rows.lock().unwrap().insert(memory.id, memory.clone());
        Ok(())
    }

    async fn search_similar(
        &self,
        owner: Uuid,
        agent: Uuid,
        embedding: &[f32],
        limit: usize,
        threshold: f64,
    ) -> Result<Vec<SearchResult>> {
        let rows = self.rows.lock().unwrap();
        let mut results: Vec<SearchResult> = rows
            .values()
            .filter(|m| m.owner_user_id == owner && m.agent_id == agent)
            .filter_map(|m| {
                let stored = m.embedding.as_ref()?;
                let similarity = cosine_similarity(stored, embedding);
                if similarity >= threshold {
                    Some(SearchResult {
                        memory: Memory {
                            embedding: None,
                            ..m.clone()
                        },
                        similarity,
                    })
                } else {
                    None
                }
            })
            .collect();
        results.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        results.truncate(limit);
        Ok(results)
    }

    async fn list_by_agent(
        &self,
        owner: Uuid,
        agent: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Memory>> {
        let rows = self.rows.lock().unwrap();
        let mut matched: Vec<Memory> = rows
            .values()
            .filter(|m| m.owner_user_id == owner && m.agent_id == agent)
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count_by_agent(&self, owner: Uuid, agent: Uuid) -> Result<i64> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .values()
            .filter(|m| m.owner_user_id == owner && m.agent_id == agent)
            .count() as i64)
    }

    async fn get_by_id(&self, owner: Uuid, id: Uuid) -> Result<Option<Memory>> {
        let rows = self.rows.lock().unwrap();
        Ok(rows
            .get(&id)
            .filter(|m| m.owner_user_id == owner)
            .cloned())
    }

    async fn delete(&self, owner: Uuid, id: Uuid) -> Result<bool> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get(&id) {
            Some(m) if m.owner_user_id == owner => {
                rows.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_by_agent(&self, owner: Uuid, agent: Uuid) -> Result<u64> {
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|_, m| !(m.owner_user_id == owner && m.agent_id == agent));
        Ok((before - rows.len()) as u64)
    }
}

/// Build a memory row with a fresh id.
pub fn new_memory(
    owner: Uuid,
    agent: Uuid,
    content: &str,
    embedding: Option<Vec<f32>>,
    memory_type: &str,
    metadata: serde_json::Value,
) -> Memory {
    Memory {
        id: Uuid::new_v4(),
        owner_user_id: owner,
        agent_id: agent,
        content: content.to_string(),
        embedding,
        memory_type: memory_type.to_string(),
        metadata: if metadata.is_null() {
            serde_json::json!({})
        } else {
            metadata
        },
        created_at: Utc::now(),
    }
}
