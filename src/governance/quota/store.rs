//! Durable daily quota accounting.
//!
//! Daily counters reset lazily: a conditional UPDATE zeroes the row when the
//! last reset is older than 24 hours, run before any read or increment.
//! Violations append to a JSONB array on the same row.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use deadpool_postgres::Pool;
use uuid::Uuid;

use super::model::UserQuota;
use crate::error::Result;

#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// Fetch the user's quota row, creating a zeroed one on first access.
    async fn get_or_create(&self, user_id: Uuid) -> Result<UserQuota>;

    /// `tokens_used_today += tokens; requests_today += 1`.
    async fn increment_daily(&self, user_id: Uuid, tokens: i64) -> Result<()>;

    /// Zero the daily counters when the last reset is older than 24 h.
    /// Returns true when a reset happened.
    async fn reset_daily_if_stale(&self, user_id: Uuid) -> Result<bool>;

    /// Append a violation entry (kind + timestamp) to the row.
    async fn record_violation(&self, user_id: Uuid, kind: &str) -> Result<()>;
}

/// PostgreSQL store over `user_quotas`.
pub struct PostgresQuotaStore {
    pool: Pool,
}

impl PostgresQuotaStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QuotaStore for PostgresQuotaStore {
    async fn get_or_create(&self, user_id: Uuid) -> Result<UserQuota> {
        let conn = self.pool.get().await?;
        conn.execute(
            "INSERT INTO user_quotas (user_id) VALUES ($1) ON CONFLICT (user_id) DO NOTHING",
            &[&user_id],
        )
        .await?;
        let row = conn
            .query_one(
                "SELECT user_id, tokens_used_today, requests_today, last_daily_reset, updated_at \
                 FROM user_quotas WHERE user_id = $1",
                &[&user_id],
            )
            .await?;
        Ok(UserQuota {
            user_id: row.get(0),
            tokens_used_today: row.get(1),
            requests_today: row.get(2),
            last_daily_reset: row.get(3),
            updated_at: row.get(4),
        })
    }

    async fn increment_daily(&self, user_id: Uuid, tokens: i64) -> Result<()> {
        let conn = self.pool.get().await?;
        conn.execute(
            "UPDATE user_quotas \
             SET tokens_used_today = tokens_used_today + $2, \
                 requests_today = requests_today + 1, \
                 updated_at = NOW() \
             WHERE user_id = $1",
            &[&user_id, &tokens],
        )
        .await?;
        Ok(())
    }

    async fn reset_daily_if_stale(&self, user_id: Uuid) -> Result<bool> {
        let conn = self.pool.get().await?;
        let affected = conn
            .execute(
                "UPDATE user_quotas \
                 SET tokens_used_today = 0, \
                     requests_today = 0, \
                     last_daily_reset = NOW(), \
                     updated_at = NOW() \
                 WHERE user_id = $1 AND last_daily_reset < NOW() - INTERVAL '24 hours'",
                &[&user_id],
            )
            .await?;
        Ok(affected > 0)
    }

    async fn record_violation(&self, user_id: Uuid, kind: &str) -> Result<()> {
        let entry = serde_json::json!([{
            "type": kind,
            "timestamp": Utc::now(),
        }]);
        let conn = self.pool.get().await?;
        conn.execute(
            "UPDATE user_quotas \
             SET violations = violations || $2::jsonb, updated_at = NOW() \
             WHERE user_id = $1",
            &[&user_id, &entry],
        )
        .await?;
        Ok(())
    }
}

#[derive(Default)]
struct QuotaEntry {
    quota: Option<UserQuota>,
    violations: Vec<serde_json::Value>,
}

/// In-process store for the embedded mode and tests.
#[derive(Default)]
pub struct MemoryQuotaStore {
    entries: Mutex<HashMap<Uuid, QuotaEntry>>,
}

impl MemoryQuotaStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded violations for one user, oldest first.
    pub fn violations(&self, user_id: Uuid) -> Vec<serde_json::Value> {
        self.entries
            .lock()
            .unwrap()
            .get(&user_id)
            .map(|e| e.violations.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl QuotaStore for MemoryQuotaStore {
    async fn get_or_create(&self, user_id: Uuid) -> Result<UserQuota> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(user_id).or_default();
        Ok(entry
            .quota
            .get_or_insert_with(|| UserQuota::new(user_id))
            .clone())
    }

    async fn increment_daily(&self, user_id: Uuid, tokens: i64) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(user_id).or_default();
        let quota = entry.quota.get_or_insert_with(|| UserQuota::new(user_id));
        quota.tokens_used_today += tokens;
        quota.requests_today += 1;
        quota.updated_at = Utc::now();
        Ok(())
    }

    async fn reset_daily_if_stale(&self, user_id: Uuid) -> Result<bool> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(user_id).or_default();
        let Some(quota) = entry.quota.as_mut() else {
            return Ok(false);
        };
        let now = Utc::now();
        if now - quota.last_daily_reset > ChronoDuration::hours(24) {
            quota.tokens_used_today = 0;
            quota.requests_today = 0;
            quota.last_daily_reset = now;
            quota.updated_at = now;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn record_violation(&self, user_id: Uuid, kind: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        let entry = entries.entry(user_id).or_default();
        entry.violations.push(serde_json::json!({
            "type": kind,
            "timestamp": Utc::now(),
        }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_or_create_starts_zeroed() {
        let store = MemoryQuotaStore::new();
        let user = Uuid::new_v4();
        let quota = store.get_or_create(user).await.unwrap();
        assert_eq!(quota.tokens_used_today, 0);
        assert_eq!(quota.requests_today, 0);
    }

    #[tokio::test]
    async fn test_increment_daily() {
        let store = MemoryQuotaStore::new();
        let user = Uuid::new_v4();
        store.increment_daily(user, 120).await.unwrap();
        store.increment_daily(user, 80).await.unwrap();
        let quota = store.get_or_create(user).await.unwrap();
        assert_eq!(quota.tokens_used_today, 200);
        assert_eq!(quota.requests_today, 2);
    }

    #[tokio::test]
    async fn test_reset_only_when_stale() {
        let store = MemoryQuotaStore::new();
        let user = Uuid::new_v4();
        store.increment_daily(user, 10).await.unwrap();
        assert!(!store.reset_daily_if_stale(user).await.unwrap());

        // Backdate the reset marker past the 24h threshold.
        {
            let mut entries = store.entries.lock().unwrap();
            let quota = entries.get_mut(&user).unwrap().quota.as_mut().unwrap();
            quota.last_daily_reset = Utc::now() - ChronoDuration::hours(25);
        }
        assert!(store.reset_daily_if_stale(user).await.unwrap());
        let quota = store.get_or_create(user).await.unwrap();
        assert_eq!(quota.tokens_used_today, 0);
        assert_eq!(quota.requests_today, 0);
    }

    #[tokio::test]
    async fn test_record_violation_appends() {
        let store = MemoryQuotaStore::new();
        let user = Uuid::new_v4();
        store.record_violation(user, "rate_limit_minute").await.unwrap();
        store.record_violation(user, "daily_token_limit").await.unwrap();
        let violations = store.violations(user);
        assert_eq!(violations.len(), 2);
        assert_eq!(violations[0]["type"], "rate_limit_minute");
        assert_eq!(violations[1]["type"], "daily_token_limit");
    }
}
