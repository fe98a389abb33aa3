//! Memory data types: long-term rows, short-term entries, and the context
//! payload shipped to workers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Speaker of a short-term conversation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// A single turn in the short-term conversation ring.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl ConversationEntry {
    pub fn new(role: Role, content: &str) -> Self {
        Self {
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// A long-term, vector-searchable memory row.
///
/// Rows are append-only and always scoped by `(owner_user_id, agent_id)`;
/// both columns appear in the predicate of every read and write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: Uuid,
    pub owner_user_id: Uuid,
    pub agent_id: Uuid,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub memory_type: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A memory returned from similarity search, with its score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub memory: Memory,
    pub similarity: f64,
}

/// A long-term memory trimmed down for the worker context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelevantMemory {
    pub content: String,
    pub memory_type: String,
    pub similarity: f64,
}

/// The memory context injected into a task request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextPayload {
    #[serde(default)]
    pub recent_messages: Vec<ConversationEntry>,
    #[serde(default)]
    pub relevant_memories: Vec<RelevantMemory>,
}

impl ContextPayload {
    pub fn is_empty(&self) -> bool {
        self.recent_messages.is_empty() && self.relevant_memories.is_empty()
    }
}
