//! Short-term conversation memory.
//!
//! One bounded, TTL'd ring of recent turns per `(agent, user address)` pair.
//! The Redis backend keys rings as `conv:<agent_id>:<user_address>` and
//! performs append+trim+expire in a single pipelined round-trip so a crash
//! can never leave a half-applied update.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

use super::model::ConversationEntry;
use crate::error::Result;

fn conversation_key(agent_id: Uuid, user_address: &str) -> String {
    format!("conv:{}:{}", agent_id, user_address)
}

#[async_trait]
pub trait ShortTermStore: Send + Sync {
    /// Append an entry, trim the ring to the last `max` entries, and refresh
    /// the TTL, atomically.
    async fn append(
        &self,
        agent_id: Uuid,
        user_address: &str,
        entry: ConversationEntry,
        max: usize,
        ttl: Duration,
    ) -> Result<()>;

    /// Return the last `limit` entries, oldest first.
    async fn recent(
        &self,
        agent_id: Uuid,
        user_address: &str,
        limit: usize,
    ) -> Result<Vec<ConversationEntry>>;

    /// Drop the ring for one conversation.
    async fn clear(&self, agent_id: Uuid, user_address: &str) -> Result<()>;
}

/// Redis-backed ring store.
pub struct RedisShortTermStore {
    conn: ConnectionManager,
}

impl RedisShortTermStore {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl ShortTermStore for RedisShortTermStore {
    async fn append(
        &self,
        agent_id: Uuid,
        user_address: &str,
        entry: ConversationEntry,
        max: usize,
        ttl: Duration,
    ) -> Result<()> {
        let key = conversation_key(agent_id, user_address);
        let payload = serde_json::to_string(&entry)?;
        let mut conn = self.conn.clone();
        redis::pipe()
            .atomic()
            .rpush(&key, payload)
            .ignore()
            .ltrim(&key, -(max as isize), -1)
            .ignore()
            .expire(&key, ttl.as_secs() as i64)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn recent(
        &self,
        agent_id: Uuid,
        user_address: &str,
        limit: usize,
    ) -> Result<Vec<ConversationEntry>> {
        let key = conversation_key(agent_id, user_address);
        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn.lrange(&key, -(limit as isize), -1).await?;
        // Malformed entries are skipped, never fatal.
        Ok(raw
            .iter()
            .filter_map(|v| serde_json::from_str(v).ok())
            .collect())
    }

    async fn clear(&self, agent_id: Uuid, user_address: &str) -> Result<()> {
        let key = conversation_key(agent_id, user_address);
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(&key).await?;
        Ok(())
    }
}

struct Ring {
    entries: VecDeque<ConversationEntry>,
    expires_at: Instant,
}

/// In-process ring store for the embedded mode and tests.
#[derive(Default)]
pub struct MemoryShortTermStore {
    rings: Mutex<HashMap<String, Ring>>,
}

impl MemoryShortTermStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ShortTermStore for MemoryShortTermStore {
    async fn append(
        &self,
        agent_id: Uuid,
        user_address: &str,
        entry: ConversationEntry,
        max: usize,
        ttl: Duration,
    ) -> Result<()> {
        let key = conversation_key(agent_id, user_address);
        let mut rings = self.rings.lock().unwrap();
        let now = Instant::now();
        let ring = rings.entry(key).or_insert_with(|| Ring {
            entries: VecDeque::new(),
            expires_at: now + ttl,
        });
        if ring.expires_at <= now {
            ring.entries.clear();
        }
        ring.entries.push_back(entry);
        while ring.entries.len() > max {
            ring.entries.pop_front();
        }
        ring.expires_at = now + ttl;
        Ok(())
    }

    async fn recent(
        &self,
        agent_id: Uuid,
        user_address: &str,
        limit: usize,
    ) -> Result<Vec<ConversationEntry>> {
        let key = conversation_key(agent_id, user_address);
        let rings = self.rings.lock().unwrap();
        Ok(match rings.get(&key) {
            Some(ring) if ring.expires_at > Instant::now() => {
                let skip = ring.entries.len().saturating_sub(limit);
                ring.entries.iter().skip(skip).cloned().collect()
            }
            _ => Vec::new(),
        })
    }

    async fn clear(&self, agent_id: Uuid, user_address: &str) -> Result<()> {
        let key = conversation_key(agent_id, user_address);
        self.rings.lock().unwrap().remove(&key);
        Ok(())
    }
}
