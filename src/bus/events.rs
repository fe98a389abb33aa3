//! Subjects, stream names, and event payload types for the AIOX bus.
//!
//! Every cross-subsystem message is one of the types defined here, JSON
//! encoded with snake_case field names. Unknown fields are ignored on
//! decode so payloads can grow without breaking older consumers.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default batch size for consumer fetches.
pub const FETCH_BATCH: usize = 10;

/// Default max wait for a consumer fetch. A fetch that returns empty after
/// this long is not an error; the loop simply iterates again.
pub const FETCH_MAX_WAIT: Duration = Duration::from_secs(2);

/// Subject for inbound chat messages (ingress gateway → orchestrator).
pub const SUBJECT_INBOUND: &str = "aiox.messages.inbound";
/// Subject for outbound chat messages (dispatcher/orchestrator → relay).
pub const SUBJECT_OUTBOUND: &str = "aiox.messages.outbound";
/// Prefix for per-agent task subjects (`aiox.tasks.<agent_id>`).
pub const SUBJECT_TASK_PREFIX: &str = "aiox.tasks";
/// Subject for agent lifecycle events.
pub const SUBJECT_AGENT_EVENT: &str = "aiox.events.agent";
/// Subject for audit events.
pub const SUBJECT_AUDIT_EVENT: &str = "aiox.events.audit";

/// Returns the task subject for one agent.
pub fn task_subject(agent_id: Uuid) -> String {
    format!("{}.{}", SUBJECT_TASK_PREFIX, agent_id)
}

/// The three logical streams of the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamName {
    /// Inbound/outbound chat traffic. Work-queue retention, 24 h max age.
    Messages,
    /// Agent work items, one subject per agent. Work-queue retention, 1 h max age.
    Tasks,
    /// Audit and agent lifecycle events. Limits retention, 7 d max age.
    Events,
}

impl StreamName {
    /// Stream name as declared on the broker.
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamName::Messages => "AIOX_MESSAGES",
            StreamName::Tasks => "AIOX_TASKS",
            StreamName::Events => "AIOX_EVENTS",
        }
    }

    /// The wildcard subject owned by this stream.
    pub fn wildcard(&self) -> &'static str {
        match self {
            StreamName::Messages => "aiox.messages.>",
            StreamName::Tasks => "aiox.tasks.>",
            StreamName::Events => "aiox.events.>",
        }
    }

    /// Maximum message age before the broker discards.
    pub fn max_age(&self) -> Duration {
        match self {
            StreamName::Messages => Duration::from_secs(24 * 3600),
            StreamName::Tasks => Duration::from_secs(3600),
            StreamName::Events => Duration::from_secs(7 * 24 * 3600),
        }
    }

    /// Whether acked messages are deleted from the stream (work-queue).
    pub fn is_work_queue(&self) -> bool {
        !matches!(self, StreamName::Events)
    }

    /// Resolve the stream that owns a subject, if any.
    pub fn for_subject(subject: &str) -> Option<StreamName> {
        if subject.starts_with("aiox.messages.") {
            Some(StreamName::Messages)
        } else if subject.starts_with("aiox.tasks.") {
            Some(StreamName::Tasks)
        } else if subject.starts_with("aiox.events.") {
            Some(StreamName::Events)
        } else {
            None
        }
    }
}

/// A chat message captured by the ingress gateway.
///
/// `id` is the dispatch correlation anchor: the task derived from this
/// message carries it as `request_id`, and the terminal outbound reply
/// references it as `in_reply_to`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    pub from_address: String,
    pub to_address: String,
    pub body: String,
    pub stanza_type: String,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    /// Capture a stanza as an inbound message with a fresh id.
    pub fn new(from_address: &str, to_address: &str, body: &str, stanza_type: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            from_address: from_address.to_string(),
            to_address: to_address.to_string(),
            body: body.to_string(),
            stanza_type: stanza_type.to_string(),
            received_at: Utc::now(),
        }
    }
}

/// A reply to be delivered by the outbound relay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub id: String,
    pub to_address: String,
    pub from_address: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
}

impl OutboundMessage {
    /// Build a reply correlated to an earlier inbound message.
    pub fn reply(to_address: &str, from_address: &str, body: &str, in_reply_to: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            to_address: to_address.to_string(),
            from_address: from_address.to_string(),
            body: body.to_string(),
            in_reply_to: Some(in_reply_to.to_string()),
        }
    }
}

/// A routed work item, published by the orchestrator and consumed by the
/// dispatcher on `aiox.tasks.<agent_id>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskMessage {
    pub request_id: String,
    pub agent_id: Uuid,
    pub owner_user_id: Uuid,
    pub message: String,
    pub from_address: String,
    pub agent_address: String,
    pub agent_name: String,
}

/// Agent lifecycle event for observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    pub agent_id: Uuid,
    pub owner_user_id: Uuid,
    pub address: String,
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
}

/// The closed set of audit event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    MessageRouted,
    TaskCompleted,
    TaskFailed,
    QuotaExceeded,
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MessageRouted => write!(f, "message_routed"),
            Self::TaskCompleted => write!(f, "task_completed"),
            Self::TaskFailed => write!(f, "task_failed"),
            Self::QuotaExceeded => write!(f, "quota_exceeded"),
        }
    }
}

/// Audit event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditSeverity {
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for AuditSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Compliance/observability record, persisted by the audit consumer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub owner_user_id: Uuid,
    pub event_type: AuditEventType,
    pub severity: AuditSeverity,
    pub resource_type: String,
    pub resource_id: String,
    pub details: String,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        owner_user_id: Uuid,
        event_type: AuditEventType,
        severity: AuditSeverity,
        resource_type: &str,
        resource_id: &str,
        details: &str,
    ) -> Self {
        Self {
            owner_user_id,
            event_type,
            severity,
            resource_type: resource_type.to_string(),
            resource_id: resource_id.to_string(),
            details: details.to_string(),
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_subject_format() {
        let id = Uuid::new_v4();
        assert_eq!(task_subject(id), format!("aiox.tasks.{}", id));
    }

    #[test]
    fn test_stream_for_subject() {
        assert_eq!(
            StreamName::for_subject(SUBJECT_INBOUND),
            Some(StreamName::Messages)
        );
        assert_eq!(
            StreamName::for_subject("aiox.tasks.abc"),
            Some(StreamName::Tasks)
        );
        assert_eq!(
            StreamName::for_subject(SUBJECT_AUDIT_EVENT),
            Some(StreamName::Events)
        );
        assert_eq!(StreamName::for_subject("other.subject"), None);
    }

    #[test]
    fn test_retention_split() {
        assert!(StreamName::Messages.is_work_queue());
        assert!(StreamName::Tasks.is_work_queue());
        assert!(!StreamName::Events.is_work_queue());
    }

    #[test]
    fn test_inbound_message_roundtrip() {
        let msg = InboundMessage::new("u@example.org", "agent-x@agents.example.org", "hi", "chat");
        let json = serde_json::to_string(&msg).unwrap();
        let back: InboundMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, msg.id);
        assert_eq!(back.from_address, "u@example.org");
        assert_eq!(back.body, "hi");
        assert_eq!(back.stanza_type, "chat");
    }

    #[test]
    fn test_outbound_reply_correlation() {
        let out = OutboundMessage::reply("u@d", "agent-x@agents.d", "pong", "req-1");
        assert_eq!(out.in_reply_to.as_deref(), Some("req-1"));
        assert!(!out.id.is_empty());
    }

    #[test]
    fn test_unknown_fields_ignored() {
        let json = r#"{
            "id": "m1", "from_address": "a", "to_address": "b", "body": "x",
            "stanza_type": "chat", "received_at": "2025-01-01T00:00:00Z",
            "some_future_field": 42
        }"#;
        let msg: InboundMessage = serde_json::from_str(json).unwrap();
        assert_eq!(msg.id, "m1");
    }

    #[test]
    fn test_audit_event_type_serializes_snake_case() {
        let json = serde_json::to_string(&AuditEventType::TaskCompleted).unwrap();
        assert_eq!(json, "\"task_completed\"");
        assert_eq!(AuditEventType::MessageRouted.to_string(), "message_routed");
        assert_eq!(AuditSeverity::Warn.to_string(), "warn");
    }

    #[test]
    fn test_task_message_roundtrip() {
        let task = TaskMessage {
            request_id: "r1".into(),
            agent_id: Uuid::new_v4(),
            owner_user_id: Uuid::new_v4(),
            message: "hello".into(),
            from_address: "u@d".into(),
            agent_address: "agent-x@agents.d".into(),
            agent_name: "helper".into(),
        };
        let json = serde_json::to_vec(&task).unwrap();
        let back: TaskMessage = serde_json::from_slice(&json).unwrap();
        assert_eq!(back.request_id, "r1");
        assert_eq!(back.agent_id, task.agent_id);
        assert_eq!(back.agent_name, "helper");
    }
}
