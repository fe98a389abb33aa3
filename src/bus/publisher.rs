//! Typed publish methods over the event bus.

use std::sync::Arc;

use serde::Serialize;

use super::events::{
    task_subject, AgentEvent, AuditEvent, InboundMessage, OutboundMessage, TaskMessage,
    SUBJECT_AGENT_EVENT, SUBJECT_AUDIT_EVENT, SUBJECT_INBOUND, SUBJECT_OUTBOUND,
};
use super::EventBus;
use crate::error::Result;

/// Serializes each event type and publishes it on its subject.
#[derive(Clone)]
pub struct Publisher {
    bus: Arc<dyn EventBus>,
}

impl Publisher {
    pub fn new(bus: Arc<dyn EventBus>) -> Self {
        Self { bus }
    }

    /// Publish an inbound chat message for orchestrator processing.
    pub async fn inbound_message(&self, msg: &InboundMessage) -> Result<()> {
        self.publish(SUBJECT_INBOUND, msg).await
    }

    /// Publish an outbound chat message for relay delivery.
    pub async fn outbound_message(&self, msg: &OutboundMessage) -> Result<()> {
        self.publish(SUBJECT_OUTBOUND, msg).await
    }

    /// Publish a work item on the target agent's task subject.
    pub async fn task(&self, msg: &TaskMessage) -> Result<()> {
        self.publish(&task_subject(msg.agent_id), msg).await
    }

    /// Publish an agent lifecycle event.
    pub async fn agent_event(&self, event: &AgentEvent) -> Result<()> {
        self.publish(SUBJECT_AGENT_EVENT, event).await
    }

    /// Publish an audit event.
    pub async fn audit_event(&self, event: &AuditEvent) -> Result<()> {
        self.publish(SUBJECT_AUDIT_EVENT, event).await
    }

    async fn publish<T: Serialize>(&self, subject: &str, payload: &T) -> Result<()> {
        let bytes = serde_json::to_vec(payload)?;
        self.bus.publish(subject, bytes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{MemoryBus, StreamName, FETCH_MAX_WAIT};
    use uuid::Uuid;

    #[tokio::test]
    async fn test_publisher_routes_task_to_agent_subject() {
        let bus = Arc::new(MemoryBus::new());
        let publisher = Publisher::new(bus.clone());
        let agent_id = Uuid::new_v4();

        let task = TaskMessage {
            request_id: "r1".into(),
            agent_id,
            owner_user_id: Uuid::new_v4(),
            message: "hi".into(),
            from_address: "u@d".into(),
            agent_address: format!("agent-{}@agents.d", agent_id),
            agent_name: "helper".into(),
        };
        publisher.task(&task).await.unwrap();

        let mut consumer = bus
            .ensure_consumer(StreamName::Tasks, "task-dispatcher", "aiox.tasks.>")
            .await
            .unwrap();
        let mut batch = consumer.fetch(10, FETCH_MAX_WAIT).await.unwrap();
        assert_eq!(batch.len(), 1);
        let decoded: TaskMessage = serde_json::from_slice(batch[0].data()).unwrap();
        assert_eq!(decoded.agent_id, agent_id);
        batch[0].ack().await.unwrap();
    }

    #[tokio::test]
    async fn test_publisher_outbound() {
        let bus = Arc::new(MemoryBus::new());
        let publisher = Publisher::new(bus.clone());

        let out = OutboundMessage::reply("u@d", "agent-x@agents.d", "pong", "req-9");
        publisher.outbound_message(&out).await.unwrap();

        let mut consumer = bus
            .ensure_consumer(StreamName::Messages, "outbound-relay", "aiox.messages.outbound")
            .await
            .unwrap();
        let mut batch = consumer.fetch(10, FETCH_MAX_WAIT).await.unwrap();
        assert_eq!(batch.len(), 1);
        let decoded: OutboundMessage = serde_json::from_slice(batch[0].data()).unwrap();
        assert_eq!(decoded.in_reply_to.as_deref(), Some("req-9"));
        batch[0].ack().await.unwrap();
    }
}
