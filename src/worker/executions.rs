//! Per-task execution records.
//!
//! One row per dispatch outcome. Retries under at-least-once delivery can
//! produce duplicate rows with distinct ids; readers must tolerate that.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::Pool;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// Terminal state of a dispatched task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Completed,
    Error,
    Timeout,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Error => write!(f, "error"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// A recorded task execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub owner_user_id: Uuid,
    pub agent_id: Uuid,
    pub input: String,
    pub output: String,
    pub tokens_used: i64,
    pub worker_id: String,
    /// Time the worker reported spending on the task.
    pub worker_latency_ms: i64,
    /// Time between dispatch and terminal outcome, measured here.
    pub dispatch_latency_ms: i64,
    pub status: ExecutionStatus,
    pub error_message: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn record(&self, execution: &Execution) -> Result<()>;
}

/// PostgreSQL store over `executions`.
pub struct PostgresExecutionStore {
    pool: Pool,
}

impl PostgresExecutionStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ExecutionStore for PostgresExecutionStore {
    async fn record(&self, execution: &Execution) -> Result<()> {
        let conn = self.pool.get().await?;
        conn.execute(
            "INSERT INTO executions \
             (id, owner_user_id, agent_id, input, output, tokens_used, worker_id, \
              worker_latency_ms, dispatch_latency_ms, status, error_message, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            &[
                &execution.id,
                &execution.owner_user_id,
                &execution.agent_id,
                &execution.input,
                &execution.output,
                &execution.tokens_used,
                &execution.worker_id,
                &execution.worker_latency_ms,
                &execution.dispatch_latency_ms,
                &execution.status.to_string(),
                &execution.error_message,
                &execution.created_at,
            ],
        )
        .await?;
        Ok(())
    }
}

/// In-process store for the embedded mode and tests.
#[derive(Default)]
pub struct MemoryExecutionStore {
    rows: Mutex<Vec<Execution>>,
}

impl MemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<Execution> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExecutionStore for MemoryExecutionStore {
    async fn record(&self, execution: &Execution) -> Result<()> {
        self.rows.lock().unwrap().push(execution.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(ExecutionStatus::Completed.to_string(), "completed");
        assert_eq!(ExecutionStatus::Error.to_string(), "error");
        assert_eq!(ExecutionStatus::Timeout.to_string(), "timeout");
    }

    #[tokio::test]
    async fn test_memory_store_records() {
        let store = MemoryExecutionStore::new();
        store
            .record(&Execution {
                id: Uuid::new_v4(),
                owner_user_id: Uuid::new_v4(),
                agent_id: Uuid::new_v4(),
                input: "hi".into(),
                output: "hello".into(),
                tokens_used: 12,
                worker_id: "w1".into(),
                worker_latency_ms: 900,
                dispatch_latency_ms: 1000,
                status: ExecutionStatus::Completed,
                error_message: String::new(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        let rows = store.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, ExecutionStatus::Completed);
    }
}
