//! Audit log rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A persisted audit entry (`audit_logs`).
///
/// Delivery from the bus is at-least-once, so rows carry a fresh id per
/// insert and readers must tolerate duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: Uuid,
    pub owner_user_id: Uuid,
    pub event_type: String,
    pub severity: String,
    pub resource_type: String,
    /// Parsed from the event's string form; None when it is not a UUID.
    pub resource_id: Option<Uuid>,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
