//! Audit log persistence.

use std::sync::Mutex;

use async_trait::async_trait;
use deadpool_postgres::Pool;
use uuid::Uuid;

use super::model::AuditLog;
use crate::error::Result;

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn insert(&self, log: &AuditLog) -> Result<()>;
    async fn list_by_owner(&self, owner: Uuid, limit: i64, offset: i64) -> Result<Vec<AuditLog>>;
}

/// PostgreSQL store over `audit_logs`.
pub struct PostgresAuditStore {
    pool: Pool,
}

impl PostgresAuditStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditStore for PostgresAuditStore {
    async fn insert(&self, log: &AuditLog) -> Result<()> {
        let conn = self.pool.get().await?;
        conn.execute(
            "INSERT INTO audit_logs \
             (id, owner_user_id, event_type, severity, resource_type, resource_id, details, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            &[
                &log.id,
                &log.owner_user_id,
                &log.event_type,
                &log.severity,
                &log.resource_type,
                &log.resource_id,
                &log.details,
                &log.created_at,
            ],
        )
        .await?;
        Ok(())
    }

    async fn list_by_owner(&self, owner: Uuid, limit: i64, offset: i64) -> Result<Vec<AuditLog>> {
        let conn = self.pool.get().await?;
        let rows = conn
            .query(
                "SELECT id, owner_user_id, event_type, severity, resource_type, resource_id, details, created_at \
                 FROM audit_logs WHERE owner_user_id = $1 \
                 ORDER BY created_at DESC LIMIT $2 OFFSET $3",
                &[&owner, &limit, &offset],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| AuditLog {
                id: row.get(0),
                owner_user_id: row.get(1),
                event_type: row.get(2),
                severity: row.get(3),
                resource_type: row.get(4),
                resource_id: row.get(5),
                details: row.get(6),
                created_at: row.get(7),
            })
            .collect())
    }
}

/// In-process store for the embedded mode and tests.
#[derive(Default)]
pub struct MemoryAuditStore {
    logs: Mutex<Vec<AuditLog>>,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All rows in insertion order.
    pub fn rows(&self) -> Vec<AuditLog> {
        self.logs.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn insert(&self, log: &AuditLog) -> Result<()> {
        self.logs.lock().unwrap().push(log.clone());
        Ok(())
    }

    async fn list_by_owner(&self, owner: Uuid, limit: i64, offset: i64) -> Result<Vec<AuditLog>> {
        let logs = self.logs.lock().unwrap();
        let mut matched: Vec<AuditLog> = logs
            .iter()
            .filter(|l| l.owner_user_id == owner)
            .cloned()
            .collect();
        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matched
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }
}
