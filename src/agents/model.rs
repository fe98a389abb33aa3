//! Agent record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A tenant-owned conversational identity.
///
/// `system_prompt` holds the AEAD-sealed blob, never plaintext; decryption
/// happens once per dispatch, just before the task request is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: Uuid,
    pub owner_user_id: Uuid,
    /// Bare address, `agent-<uuid>@agents.<domain>`. Unique platform-wide.
    pub address: String,
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    pub llm_config: serde_json::Value,
    pub memory_policy: serde_json::Value,
    pub governance: serde_json::Value,
    pub visibility: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Soft-delete marker; a set value hides the agent from every read path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Input for registering a new agent.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateAgentRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub system_prompt: String,
    #[serde(default)]
    pub llm_config: serde_json::Value,
    #[serde(default)]
    pub memory_policy: serde_json::Value,
    #[serde(default)]
    pub governance: serde_json::Value,
    #[serde(default)]
    pub visibility: Option<String>,
}
