//! Durable worker registry (`ai_workers`).
//!
//! Registration upserts a row, heartbeats refresh health metrics, stream end
//! flags the row offline. Routing never reads this table; the in-memory pool
//! is authoritative for selection.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use uuid::Uuid;

use crate::error::Result;

#[async_trait]
pub trait WorkerRegistry: Send + Sync {
    async fn upsert(&self, worker_id: &str, capabilities: serde_json::Value) -> Result<()>;
    async fn update_heartbeat(
        &self,
        worker_id: &str,
        active_tasks: i32,
        avg_latency_ms: i32,
        memory_usage_mb: i32,
    ) -> Result<()>;
    async fn mark_offline(&self, worker_id: &str) -> Result<()>;
}

/// PostgreSQL registry.
pub struct PostgresWorkerRegistry {
    pool: Pool,
}

impl PostgresWorkerRegistry {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkerRegistry for PostgresWorkerRegistry {
    async fn upsert(&self, worker_id: &str, capabilities: serde_json::Value) -> Result<()> {
        let conn = self.pool.get().await?;
        conn.execute(
            "INSERT INTO ai_workers (id, worker_id, status, capabilities, last_heartbeat, created_at, updated_at) \
             VALUES ($1, $2, 'healthy', $3, NOW(), NOW(), NOW()) \
             ON CONFLICT (worker_id) DO UPDATE \
             SET status = 'healthy', capabilities = $3, last_heartbeat = NOW(), updated_at = NOW()",
            &[&Uuid::new_v4(), &worker_id, &capabilities],
        )
        .await?;
        Ok(())
    }

    async fn update_heartbeat(
        &self,
        worker_id: &str,
        active_tasks: i32,
        avg_latency_ms: i32,
        memory_usage_mb: i32,
    ) -> Result<()> {
        let conn = self.pool.get().await?;
        conn.execute(
            "UPDATE ai_workers \
             SET last_heartbeat = NOW(), active_requests = $2, avg_latency_ms = $3, \
                 memory_usage_mb = $4, updated_at = NOW() \
             WHERE worker_id = $1",
            &[&worker_id, &active_tasks, &avg_latency_ms, &memory_usage_mb],
        )
        .await?;
        Ok(())
    }

    async fn mark_offline(&self, worker_id: &str) -> Result<()> {
        let conn = self.pool.get().await?;
        conn.execute(
            "UPDATE ai_workers SET status = 'offline', updated_at = NOW() WHERE worker_id = $1",
            &[&worker_id],
        )
        .await?;
        Ok(())
    }
}

/// One registry row as held by the in-memory backend.
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub worker_id: String,
    pub status: String,
    pub capabilities: serde_json::Value,
    pub active_tasks: i32,
    pub avg_latency_ms: i32,
    pub memory_usage_mb: i32,
    pub last_heartbeat: DateTime<Utc>,
}

/// In-process registry for the embedded mode and tests.
#[derive(Default)]
pub struct MemoryWorkerRegistry {
    records: Mutex<HashMap<String, WorkerRecord>>,
}

impl MemoryWorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, worker_id: &str) -> Option<WorkerRecord> {
        self.records.lock().unwrap().get(worker_id).cloned()
    }
}

#[async_trait]
impl WorkerRegistry for MemoryWorkerRegistry {
    async fn upsert(&self, worker_id: &str, capabilities: serde_json::Value) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .entry(worker_id.to_string())
            .or_insert_with(|| WorkerRecord {
                worker_id: worker_id.to_string(),
                status: String::new(),
                capabilities: serde_json::Value::Null,
                active_tasks: 0,
                avg_latency_ms: 0,
                memory_usage_mb: 0,
                last_heartbeat: Utc::now(),
            });
        record.status = "healthy".to_string();
        record.capabilities = capabilities;
        record.last_heartbeat = Utc::now();
        Ok(())
    }

    async fn update_heartbeat(
        &self,
        worker_id: &str,
        active_tasks: i32,
        avg_latency_ms: i32,
        memory_usage_mb: i32,
    ) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        if let Some(record) = records.get_mut(worker_id) {
            record.active_tasks = active_tasks;
            record.avg_latency_ms = avg_latency_ms;
            record.memory_usage_mb = memory_usage_mb;
            record.last_heartbeat = Utc::now();
        }
        Ok(())
    }

    async fn mark_offline(&self, worker_id: &str) -> Result<()> {
        let mut records = self.records.lock().unwrap();
        if let Some(record) = records.get_mut(worker_id) {
            record.status = "offline".to_string();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_upsert_then_offline() {
        let registry = MemoryWorkerRegistry::new();
        registry
            .upsert("w1", json!({"providers": ["openai"], "max_concurrent": 4}))
            .await
            .unwrap();
        assert_eq!(registry.record("w1").unwrap().status, "healthy");

        registry.mark_offline("w1").await.unwrap();
        assert_eq!(registry.record("w1").unwrap().status, "offline");
    }

    #[tokio::test]
    async fn test_heartbeat_updates_metrics() {
        let registry = MemoryWorkerRegistry::new();
        registry.upsert("w1", json!({})).await.unwrap();
        registry.update_heartbeat("w1", 3, 250, 512).await.unwrap();
        let record = registry.record("w1").unwrap();
        assert_eq!(record.active_tasks, 3);
        assert_eq!(record.avg_latency_ms, 250);
        assert_eq!(record.memory_usage_mb, 512);
    }

    #[tokio::test]
    async fn test_heartbeat_for_unknown_worker_is_noop() {
        let registry = MemoryWorkerRegistry::new();
        registry.update_heartbeat("ghost", 1, 1, 1).await.unwrap();
        assert!(registry.record("ghost").is_none());
    }
}
