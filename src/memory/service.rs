//! Hybrid memory service: the read path assembled at dispatch time and the
//! write path applied after a completed worker response.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;
use uuid::Uuid;

use super::long_term::{new_memory, LongTermStore};
use super::model::{
    ContextPayload, ConversationEntry, Memory, RelevantMemory, Role, SearchResult,
};
use super::policy::MemoryPolicy;
use super::short_term::ShortTermStore;
use crate::error::Result;

pub struct Service {
    short_term: Arc<dyn ShortTermStore>,
    long_term: Arc<dyn LongTermStore>,
}

impl Service {
    pub fn new(short_term: Arc<dyn ShortTermStore>, long_term: Arc<dyn LongTermStore>) -> Self {
        Self {
            short_term,
            long_term,
        }
    }

    /// Assemble the context payload for a task request.
    ///
    /// Short-term turns are collected when enabled. Long-term similarity
    /// search runs only when the caller supplies a query embedding; the
    /// dispatch path currently never does, so that branch stays idle until
    /// an embedding source exists. Partial failures degrade to less context
    /// rather than failing the dispatch.
    pub async fn conversation_context(
        &self,
        owner: Uuid,
        agent: Uuid,
        user_address: &str,
        policy: &MemoryPolicy,
        query_embedding: Option<&[f32]>,
    ) -> Result<ContextPayload> {
        let mut payload = ContextPayload::default();

        if policy.short_term_enabled {
            match self
                .short_term
                .recent(agent, user_address, policy.max_short_term_msgs)
                .await
            {
                Ok(entries) => payload.recent_messages = entries,
                Err(e) => {
                    warn!(agent_id = %agent, error = %e, "fetching short-term context failed")
                }
            }
        }

        if policy.long_term_enabled {
            if let Some(embedding) = query_embedding.filter(|e| !e.is_empty()) {
                match self
                    .long_term
                    .search_similar(
                        owner,
                        agent,
                        embedding,
                        policy.max_long_term_results,
                        policy.similarity_threshold,
                    )
                    .await
                {
                    Ok(results) => {
                        payload.relevant_memories = results
                            .into_iter()
                            .map(|r| RelevantMemory {
                                content: r.memory.content,
                                memory_type: r.memory.memory_type,
                                similarity: r.similarity,
                            })
                            .collect();
                    }
                    Err(e) => {
                        warn!(agent_id = %agent, error = %e, "long-term search failed")
                    }
                }
            }
        }

        Ok(payload)
    }

    /// Append one completed exchange (user turn, then assistant turn) to the
    /// short-term ring.
    pub async fn store_conversation_turn(
        &self,
        agent: Uuid,
        user_address: &str,
        user_message: &str,
        assistant_response: &str,
        policy: &MemoryPolicy,
    ) -> Result<()> {
        if !policy.short_term_enabled {
            return Ok(());
        }
        let max = policy.max_short_term_msgs;
        let ttl = Duration::from_secs(policy.short_term_ttl_sec);
        self.short_term
            .append(
                agent,
                user_address,
                ConversationEntry::new(Role::User, user_message),
                max,
                ttl,
            )
            .await?;
        self.short_term
            .append(
                agent,
                user_address,
                ConversationEntry::new(Role::Assistant, assistant_response),
                max,
                ttl,
            )
            .await?;
        Ok(())
    }

    /// Persist a worker-produced long-term memory.
    pub async fn store_long_term(&self, memory: Memory) -> Result<()> {
        self.long_term.create(&memory).await
    }

    /// Create a memory row on behalf of the management surface.
    pub async fn create(
        &self,
        owner: Uuid,
        agent: Uuid,
        content: &str,
        embedding: Option<Vec<f32>>,
        memory_type: &str,
        metadata: serde_json::Value,
    ) -> Result<Memory> {
        let memory = new_memory(owner, agent, content, embedding, memory_type, metadata);
        self.long_term.create(&memory).await?;
        Ok(memory)
    }

    pub async fn search(
        &self,
        owner: Uuid,
        agent: Uuid,
        embedding: &[f32],
        limit: usize,
        threshold: f64,
    ) -> Result<Vec<SearchResult>> {
        let limit = if limit == 0 { 5 } else { limit };
        let threshold = if threshold <= 0.0 { 0.7 } else { threshold };
        self.long_term
            .search_similar(owner, agent, embedding, limit, threshold)
            .await
    }

    pub async fn list(
        &self,
        owner: Uuid,
        agent: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<Memory>, i64)> {
        let rows = self.long_term.list_by_agent(owner, agent, limit, offset).await?;
        let total = self.long_term.count_by_agent(owner, agent).await?;
        Ok((rows, total))
    }

    pub async fn get(&self, owner: Uuid, id: Uuid) -> Result<Option<Memory>> {
        self.long_term.get_by_id(owner, id).await
    }

    pub async fn delete(&self, owner: Uuid, id: Uuid) -> Result<bool> {
        self.long_term.delete(owner, id).await
    }

    pub async fn delete_by_agent(&self, owner: Uuid, agent: Uuid) -> Result<u64> {
        self.long_term.delete_by_agent(owner, agent).await
    }

    pub async fn clear_conversation(&self, agent: Uuid, user_address: &str) -> Result<()> {
        self.short_term.clear(agent, user_address).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::long_term::MemoryLongTermStore;
    use crate::memory::short_term::MemoryShortTermStore;
    use serde_json::json;

    fn service() -> Service {
        Service::new(
            Arc::new(MemoryShortTermStore::new()),
            Arc::new(MemoryLongTermStore::new()),
        )
    }

    fn enabled_policy() -> MemoryPolicy {
        MemoryPolicy {
            enabled: true,
            ..MemoryPolicy::default()
        }
    }

    #[tokio::test]
    async fn test_store_turn_appends_user_then_assistant() {
        let svc = service();
        let agent = Uuid::new_v4();
        let policy = enabled_policy();
        svc.store_conversation_turn(agent, "u@d", "hi", "hello there", &policy)
            .await
            .unwrap();

        let ctx = svc
            .conversation_context(Uuid::new_v4(), agent, "u@d", &policy, None)
            .await
            .unwrap();
        assert_eq!(ctx.recent_messages.len(), 2);
        assert_eq!(ctx.recent_messages[0].role, Role::User);
        assert_eq!(ctx.recent_messages[0].content, "hi");
        assert_eq!(ctx.recent_messages[1].role, Role::Assistant);
        assert_eq!(ctx.recent_messages[1].content, "hello there");
    }

    #[tokio::test]
    async fn test_short_term_disabled_stores_nothing() {
        let svc = service();
        let agent = Uuid::new_v4();
        let policy = MemoryPolicy {
            enabled: true,
            short_term_enabled: false,
            ..MemoryPolicy::default()
        };
        svc.store_conversation_turn(agent, "u@d", "hi", "yo", &policy)
            .await
            .unwrap();
        let ctx = svc
            .conversation_context(Uuid::new_v4(), agent, "u@d", &enabled_policy(), None)
            .await
            .unwrap();
        assert!(ctx.recent_messages.is_empty());
    }

    #[tokio::test]
    async fn test_no_embedding_means_no_long_term_search() {
        let svc = service();
        let owner = Uuid::new_v4();
        let agent = Uuid::new_v4();
        svc.create(owner, agent, "likes tea", Some(vec![1.0, 0.0]), "preference", json!({}))
            .await
            .unwrap();

        let ctx = svc
            .conversation_context(owner, agent, "u@d", &enabled_policy(), None)
            .await
            .unwrap();
        assert!(ctx.relevant_memories.is_empty());
    }

    #[tokio::test]
    async fn test_long_term_search_with_embedding() {
        let svc = service();
        let owner = Uuid::new_v4();
        let agent = Uuid::new_v4();
        svc.create(owner, agent, "likes tea", Some(vec![1.0, 0.0]), "preference", json!({}))
            .await
            .unwrap();

        let ctx = svc
            .conversation_context(owner, agent, "u@d", &enabled_policy(), Some(&[1.0, 0.0]))
            .await
            .unwrap();
        assert_eq!(ctx.relevant_memories.len(), 1);
        assert_eq!(ctx.relevant_memories[0].content, "likes tea");
        assert!(ctx.relevant_memories[0].similarity > 0.99);
    }

    #[tokio::test]
    async fn test_context_is_tenant_scoped() {
        let svc = service();
        let owner_a = Uuid::new_v4();
        let owner_b = Uuid::new_v4();
        let agent = Uuid::new_v4();
        svc.create(owner_a, agent, "a-secret", Some(vec![1.0, 0.0]), "fact", json!({}))
            .await
            .unwrap();

        let ctx = svc
            .conversation_context(owner_b, agent, "u@d", &enabled_policy(), Some(&[1.0, 0.0]))
            .await
            .unwrap();
        assert!(ctx.relevant_memories.is_empty());
    }

    #[tokio::test]
    async fn test_search_applies_default_limit_and_threshold() {
        let svc = service();
        let owner = Uuid::new_v4();
        let agent = Uuid::new_v4();
        for i in 0..8 {
            svc.create(owner, agent, &format!("m{}", i), Some(vec![1.0, 0.0]), "fact", json!({}))
                .await
                .unwrap();
        }
        let results = svc.search(owner, agent, &[1.0, 0.0], 0, 0.0).await.unwrap();
        assert_eq!(results.len(), 5);
    }

    #[tokio::test]
    async fn test_list_and_delete_by_agent() {
        let svc = service();
        let owner = Uuid::new_v4();
        let agent = Uuid::new_v4();
        svc.create(owner, agent, "one", None, "fact", json!({})).await.unwrap();
        svc.create(owner, agent, "two", None, "fact", json!({})).await.unwrap();

        let (rows, total) = svc.list(owner, agent, 10, 0).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(total, 2);

        assert_eq!(svc.delete_by_agent(owner, agent).await.unwrap(), 2);
        let (_, total) = svc.list(owner, agent, 10, 0).await.unwrap();
        assert_eq!(total, 0);
    }
}
