//! Quota accounting types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-user daily accounting row (`user_quotas`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserQuota {
    pub user_id: Uuid,
    pub tokens_used_today: i64,
    pub requests_today: i64,
    pub last_daily_reset: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserQuota {
    pub fn new(user_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            tokens_used_today: 0,
            requests_today: 0,
            last_daily_reset: now,
            updated_at: now,
        }
    }
}

/// Current usage and limits, for the management surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaStatus {
    pub tokens_used_today: i64,
    pub tokens_limit_day: i64,
    pub requests_today: i64,
    pub requests_limit_day: i64,
    pub requests_used_minute: i64,
    pub requests_limit_minute: i64,
}

/// A denied request with the reason shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaDenial {
    /// Violation kind as recorded: `rate_limit_minute`, `daily_token_limit`,
    /// or `daily_request_limit`.
    pub kind: &'static str,
    pub message: String,
}
