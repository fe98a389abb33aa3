//! Quota enforcement and deduction.
//!
//! Enforcement order: sliding-minute window first (fast path), then daily
//! tokens, then daily requests. Both deny paths record a violation. On
//! key-value-store errors the engine fails open; the durable daily row
//! remains authoritative, and availability beats strictness for the
//! per-minute check.

use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use super::model::{QuotaDenial, QuotaStatus};
use super::rate_window::RateWindow;
use super::store::QuotaStore;
use crate::config::GovernanceSettings;
use crate::error::Result;

pub struct Service {
    store: Arc<dyn QuotaStore>,
    window: Arc<dyn RateWindow>,
    settings: GovernanceSettings,
}

impl Service {
    pub fn new(
        store: Arc<dyn QuotaStore>,
        window: Arc<dyn RateWindow>,
        settings: GovernanceSettings,
    ) -> Self {
        Self {
            store,
            window,
            settings,
        }
    }

    /// Check all limits for a user. `None` means allowed.
    pub async fn check(&self, user_id: Uuid) -> Option<QuotaDenial> {
        match self
            .window
            .check_and_increment(user_id, self.settings.max_tokens_per_minute)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                if let Err(e) = self.store.record_violation(user_id, "rate_limit_minute").await {
                    warn!(user_id = %user_id, error = %e, "recording rate violation failed");
                }
                return Some(QuotaDenial {
                    kind: "rate_limit_minute",
                    message: format!(
                        "rate limit exceeded: max {} requests per minute",
                        self.settings.max_tokens_per_minute
                    ),
                });
            }
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "rate window unavailable, allowing request");
            }
        }

        if let Err(e) = self.store.reset_daily_if_stale(user_id).await {
            warn!(user_id = %user_id, error = %e, "daily reset check failed");
        }

        let quota = match self.store.get_or_create(user_id).await {
            Ok(quota) => quota,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "quota row unavailable, allowing request");
                return None;
            }
        };

        if quota.tokens_used_today >= self.settings.max_tokens_per_day {
            if let Err(e) = self.store.record_violation(user_id, "daily_token_limit").await {
                warn!(user_id = %user_id, error = %e, "recording token violation failed");
            }
            return Some(QuotaDenial {
                kind: "daily_token_limit",
                message: format!(
                    "daily token limit exceeded: {}/{} tokens used",
                    quota.tokens_used_today, self.settings.max_tokens_per_day
                ),
            });
        }

        if quota.requests_today >= self.settings.max_requests_per_day {
            if let Err(e) = self
                .store
                .record_violation(user_id, "daily_request_limit")
                .await
            {
                warn!(user_id = %user_id, error = %e, "recording request violation failed");
            }
            return Some(QuotaDenial {
                kind: "daily_request_limit",
                message: format!(
                    "daily request limit exceeded: {}/{} requests",
                    quota.requests_today, self.settings.max_requests_per_day
                ),
            });
        }

        None
    }

    /// Record token usage after a completed worker response.
    pub async fn deduct_tokens(&self, user_id: Uuid, tokens: i64) -> Result<()> {
        self.store.increment_daily(user_id, tokens).await
    }

    /// Current usage and limits for the management surface.
    pub async fn status(&self, user_id: Uuid) -> Result<QuotaStatus> {
        if let Err(e) = self.store.reset_daily_if_stale(user_id).await {
            warn!(user_id = %user_id, error = %e, "daily reset check failed");
        }
        let quota = self.store.get_or_create(user_id).await?;
        let minute = match self.window.minute_usage(user_id).await {
            Ok(count) => count,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "minute usage unavailable");
                0
            }
        };
        Ok(QuotaStatus {
            tokens_used_today: quota.tokens_used_today,
            tokens_limit_day: self.settings.max_tokens_per_day,
            requests_today: quota.requests_today,
            requests_limit_day: self.settings.max_requests_per_day,
            requests_used_minute: minute,
            requests_limit_minute: self.settings.max_tokens_per_minute,
        })
    }
}
