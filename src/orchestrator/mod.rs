//! Orchestrator: turns inbound chat into routable tasks, or rejects.
//!
//! One durable consumer on the inbound subject. Deterministic failures
//! (unroutable address, unknown agent, governance rejection, quota denial)
//! ack the inbound and answer the sender with an explanatory reply, since a
//! poison message must never spin on redelivery. Transient failures nak so
//! the bus retries. The orchestrator never waits for a worker; the
//! dispatcher owns the eventual response.

mod router;
mod validator;

pub use router::{RouteResult, Router};
pub use validator::Validator;

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::bus::{
    AgentEvent, AuditEvent, AuditEventType, AuditSeverity, BusMessage, EventBus, InboundMessage,
    Publisher, StreamName, TaskMessage, FETCH_BATCH, FETCH_MAX_WAIT, SUBJECT_INBOUND,
};
use crate::error::Result;
use crate::governance::quota;
use tokio::sync::watch;

const DURABLE_NAME: &str = "orchestrator";

pub struct Orchestrator {
    bus: Arc<dyn EventBus>,
    publisher: Publisher,
    router: Router,
    validator: Validator,
    quota: Arc<quota::Service>,
}

impl Orchestrator {
    pub fn new(
        bus: Arc<dyn EventBus>,
        publisher: Publisher,
        router: Router,
        validator: Validator,
        quota: Arc<quota::Service>,
    ) -> Self {
        Self {
            bus,
            publisher,
            router,
            validator,
            quota,
        }
    }

    /// Run the consume loop until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut consumer = self
            .bus
            .ensure_consumer(StreamName::Messages, DURABLE_NAME, SUBJECT_INBOUND)
            .await?;
        info!(consumer = DURABLE_NAME, "orchestrator started");

        loop {
            if *shutdown.borrow() {
                info!("orchestrator stopped");
                return Ok(());
            }
            let batch = match consumer.fetch(FETCH_BATCH, FETCH_MAX_WAIT).await {
                Ok(batch) => batch,
                Err(e) => {
                    debug!(error = %e, "fetching inbound messages");
                    continue;
                }
            };
            for msg in batch {
                self.process_message(msg).await;
            }
        }
    }

    /// Handle one inbound message. Public so tests can drive single messages
    /// without the loop.
    pub async fn process_message(&self, mut msg: Box<dyn BusMessage>) {
        let inbound: InboundMessage = match serde_json::from_slice(msg.data()) {
            Ok(inbound) => inbound,
            Err(e) => {
                error!(error = %e, "decoding inbound message");
                let _ = msg.nak().await;
                return;
            }
        };

        let span = info_span!(
            "inbound",
            message_id = %inbound.id,
            from = %inbound.from_address,
            to = %inbound.to_address,
        );
        async {
            // Route: address → agent.
            let route = match self.router.route(&inbound.to_address).await {
                Ok(Some(route)) => route,
                Ok(None) => {
                    warn!("no agent for address");
                    self.send_error_reply(&inbound, "Agent not found").await;
                    let _ = msg.ack().await;
                    return;
                }
                Err(e) => {
                    error!(error = %e, "routing lookup failed");
                    let _ = msg.nak().await;
                    return;
                }
            };

            // Ownership and base governance.
            if let Err(e) = self.validator.validate(&route) {
                warn!(agent_id = %route.agent_id, error = %e, "route validation failed");
                self.send_error_reply(&inbound, "Message not authorized").await;
                self.publish_audit(
                    &route,
                    AuditEventType::TaskFailed,
                    AuditSeverity::Warn,
                    &format!("Message not authorized: {}", e),
                )
                .await;
                let _ = msg.ack().await;
                return;
            }

            // Quota gate, charged to the agent owner. A denial must land
            // before any task publish or worker send.
            if let Some(denial) = self.quota.check(route.owner_user_id).await {
                warn!(owner = %route.owner_user_id, kind = denial.kind, "quota denied");
                self.send_error_reply(&inbound, &denial.message).await;
                self.publish_audit(
                    &route,
                    AuditEventType::QuotaExceeded,
                    AuditSeverity::Warn,
                    &denial.message,
                )
                .await;
                let _ = msg.ack().await;
                return;
            }

            // Fan out the work item. The request id anchors the whole
            // dispatch: it must equal the inbound message id.
            let task = TaskMessage {
                request_id: inbound.id.clone(),
                agent_id: route.agent_id,
                owner_user_id: route.owner_user_id,
                message: inbound.body.clone(),
                from_address: inbound.from_address.clone(),
                agent_address: route.agent_address.clone(),
                agent_name: route.agent_name.clone(),
            };
            if let Err(e) = self.publisher.task(&task).await {
                error!(error = %e, "publishing task");
                let _ = msg.nak().await;
                return;
            }

            let event = AgentEvent {
                agent_id: route.agent_id,
                owner_user_id: route.owner_user_id,
                address: route.agent_address.clone(),
                event_type: "message_received".to_string(),
                timestamp: Utc::now(),
            };
            if let Err(e) = self.publisher.agent_event(&event).await {
                error!(error = %e, "publishing agent event");
            }

            self.publish_audit(
                &route,
                AuditEventType::MessageRouted,
                AuditSeverity::Info,
                &format!("Message routed from {}", inbound.from_address),
            )
            .await;

            let _ = msg.ack().await;
            debug!(agent_id = %route.agent_id, "task published");
        }
        .instrument(span)
        .await;
    }

    async fn send_error_reply(&self, inbound: &InboundMessage, reason: &str) {
        let reply = crate::bus::OutboundMessage::reply(
            &inbound.from_address,
            &inbound.to_address,
            &format!("Error: {}", reason),
            &inbound.id,
        );
        if let Err(e) = self.publisher.outbound_message(&reply).await {
            error!(error = %e, "publishing error reply");
        }
    }

    async fn publish_audit(
        &self,
        route: &RouteResult,
        event_type: AuditEventType,
        severity: AuditSeverity,
        details: &str,
    ) {
        let event = AuditEvent::new(
            route.owner_user_id,
            event_type,
            severity,
            "agent",
            &route.agent_id.to_string(),
            details,
        );
        if let Err(e) = self.publisher.audit_event(&event).await {
            error!(error = %e, "publishing audit event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;
    use crate::agents::{self, CreateAgentRequest, MemoryAgentStore};
    use crate::bus::{BusConsumer, MemoryBus, OutboundMessage, SUBJECT_AUDIT_EVENT, SUBJECT_OUTBOUND};
    use crate::config::GovernanceSettings;
    use crate::governance::quota::{MemoryQuotaStore, MemoryRateWindow};
    use serde_json::json;
    use std::time::Duration;

    const TEST_KEY: &str = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";

    struct Fixture {
        bus: Arc<MemoryBus>,
        orchestrator: Orchestrator,
        agents: Arc<agents::Service>,
        quota_store: Arc<MemoryQuotaStore>,
    }

    fn fixture(settings: GovernanceSettings) -> Fixture {
        let bus = Arc::new(MemoryBus::new());
        let agents = Arc::new(
            agents::Service::new(Arc::new(MemoryAgentStore::new()), TEST_KEY, "example.org")
                .unwrap(),
        );
        let quota_store = Arc::new(MemoryQuotaStore::new());
        let quota = Arc::new(quota::Service::new(
            quota_store.clone(),
            Arc::new(MemoryRateWindow::new()),
            settings,
        ));
        let orchestrator = Orchestrator::new(
            bus.clone(),
            Publisher::new(bus.clone()),
            Router::new(agents.clone()),
            Validator::new(),
            quota,
        );
        Fixture {
            bus,
            orchestrator,
            agents,
            quota_store,
        }
    }

    fn default_settings() -> GovernanceSettings {
        GovernanceSettings {
            max_tokens_per_day: 100_000,
            max_tokens_per_minute: 60,
            max_requests_per_day: 1_000,
        }
    }

    async fn create_agent(fixture: &Fixture, governance: serde_json::Value) -> agents::Agent {
        fixture
            .agents
            .create(
                Uuid::new_v4(),
                &CreateAgentRequest {
                    name: "helper".into(),
                    description: String::new(),
                    system_prompt: "be brief".into(),
                    llm_config: json!({"provider": "openai"}),
                    memory_policy: serde_json::Value::Null,
                    governance,
                    visibility: None,
                },
            )
            .await
            .unwrap()
    }

    async fn inject_inbound(fixture: &Fixture, inbound: &InboundMessage) {
        Publisher::new(fixture.bus.clone())
            .inbound_message(inbound)
            .await
            .unwrap();
        let mut consumer = fixture
            .bus
            .ensure_consumer(StreamName::Messages, DURABLE_NAME, SUBJECT_INBOUND)
            .await
            .unwrap();
        let batch = consumer.fetch(FETCH_BATCH, FETCH_MAX_WAIT).await.unwrap();
        for msg in batch {
            fixture.orchestrator.process_message(msg).await;
        }
    }

    async fn drain<T: serde::de::DeserializeOwned>(
        bus: &Arc<MemoryBus>,
        stream: StreamName,
        durable: &str,
        filter: &str,
    ) -> Vec<T> {
        let mut consumer: Box<dyn BusConsumer> =
            bus.ensure_consumer(stream, durable, filter).await.unwrap();
        let mut out = Vec::new();
        let mut batch = consumer.fetch(64, Duration::from_millis(50)).await.unwrap();
        for msg in &mut batch {
            out.push(serde_json::from_slice(msg.data()).unwrap());
            msg.ack().await.unwrap();
        }
        out
    }

    #[tokio::test]
    async fn test_routes_message_to_task() {
        let fixture = fixture(default_settings());
        let agent = create_agent(&fixture, serde_json::Value::Null).await;

        let inbound = InboundMessage::new("u@example.org", &agent.address, "hi", "chat");
        inject_inbound(&fixture, &inbound).await;

        let tasks: Vec<TaskMessage> = drain(
            &fixture.bus,
            StreamName::Tasks,
            "task-dispatcher",
            "aiox.tasks.>",
        )
        .await;
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].request_id, inbound.id);
        assert_eq!(tasks[0].agent_id, agent.id);
        assert_eq!(tasks[0].owner_user_id, agent.owner_user_id);
        assert_eq!(tasks[0].message, "hi");
        assert_eq!(tasks[0].agent_name, "helper");

        let audits: Vec<AuditEvent> = drain(
            &fixture.bus,
            StreamName::Events,
            "audit-check",
            SUBJECT_AUDIT_EVENT,
        )
        .await;
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].event_type, AuditEventType::MessageRouted);
        assert_eq!(audits[0].severity, AuditSeverity::Info);

        // No outbound reply: the dispatcher owns the terminal response.
        let outbound: Vec<OutboundMessage> = drain(
            &fixture.bus,
            StreamName::Messages,
            "outbound-check",
            SUBJECT_OUTBOUND,
        )
        .await;
        assert!(outbound.is_empty());
    }

    #[tokio::test]
    async fn test_unroutable_address_gets_not_found() {
        let fixture = fixture(default_settings());
        let inbound = InboundMessage::new("u@d", "nobody@example.org", "hi", "chat");
        inject_inbound(&fixture, &inbound).await;

        let outbound: Vec<OutboundMessage> = drain(
            &fixture.bus,
            StreamName::Messages,
            "outbound-check",
            SUBJECT_OUTBOUND,
        )
        .await;
        assert_eq!(outbound.len(), 1);
        assert!(outbound[0].body.contains("Agent not found"));
        assert_eq!(outbound[0].in_reply_to.as_deref(), Some(inbound.id.as_str()));
        assert_eq!(outbound[0].to_address, "u@d");
    }

    #[tokio::test]
    async fn test_unknown_agent_gets_not_found() {
        let fixture = fixture(default_settings());
        let ghost = format!("agent-{}@agents.example.org", Uuid::new_v4());
        let inbound = InboundMessage::new("u@d", &ghost, "hi", "chat");
        inject_inbound(&fixture, &inbound).await;

        let outbound: Vec<OutboundMessage> = drain(
            &fixture.bus,
            StreamName::Messages,
            "outbound-check",
            SUBJECT_OUTBOUND,
        )
        .await;
        assert_eq!(outbound.len(), 1);
        assert!(outbound[0].body.contains("Agent not found"));
    }

    #[tokio::test]
    async fn test_soft_deleted_agent_reads_as_missing() {
        let fixture = fixture(default_settings());
        let agent = create_agent(&fixture, serde_json::Value::Null).await;
        fixture
            .agents
            .delete(agent.id, agent.owner_user_id)
            .await
            .unwrap();

        let inbound = InboundMessage::new("u@d", &agent.address, "hi", "chat");
        inject_inbound(&fixture, &inbound).await;

        let tasks: Vec<TaskMessage> = drain(
            &fixture.bus,
            StreamName::Tasks,
            "task-dispatcher",
            "aiox.tasks.>",
        )
        .await;
        assert!(tasks.is_empty());
        let outbound: Vec<OutboundMessage> = drain(
            &fixture.bus,
            StreamName::Messages,
            "outbound-check",
            SUBJECT_OUTBOUND,
        )
        .await;
        assert!(outbound[0].body.contains("Agent not found"));
    }

    #[tokio::test]
    async fn test_blocked_agent_not_authorized() {
        let fixture = fixture(default_settings());
        let agent = create_agent(&fixture, json!({"blocked": true})).await;

        let inbound = InboundMessage::new("u@d", &agent.address, "hi", "chat");
        inject_inbound(&fixture, &inbound).await;

        let tasks: Vec<TaskMessage> = drain(
            &fixture.bus,
            StreamName::Tasks,
            "task-dispatcher",
            "aiox.tasks.>",
        )
        .await;
        assert!(tasks.is_empty());

        let outbound: Vec<OutboundMessage> = drain(
            &fixture.bus,
            StreamName::Messages,
            "outbound-check",
            SUBJECT_OUTBOUND,
        )
        .await;
        assert_eq!(outbound.len(), 1);
        assert!(outbound[0].body.contains("Message not authorized"));
    }

    #[tokio::test]
    async fn test_rate_limited_owner_denied_before_dispatch() {
        let mut settings = default_settings();
        settings.max_tokens_per_minute = 1;
        let fixture = fixture(settings);
        let agent = create_agent(&fixture, serde_json::Value::Null).await;

        let first = InboundMessage::new("u@d", &agent.address, "one", "chat");
        inject_inbound(&fixture, &first).await;
        let second = InboundMessage::new("u@d", &agent.address, "two", "chat");
        inject_inbound(&fixture, &second).await;

        let tasks: Vec<TaskMessage> = drain(
            &fixture.bus,
            StreamName::Tasks,
            "task-dispatcher",
            "aiox.tasks.>",
        )
        .await;
        assert_eq!(tasks.len(), 1, "only the first request may dispatch");

        let outbound: Vec<OutboundMessage> = drain(
            &fixture.bus,
            StreamName::Messages,
            "outbound-check",
            SUBJECT_OUTBOUND,
        )
        .await;
        assert_eq!(outbound.len(), 1);
        assert!(outbound[0].body.contains("rate limit exceeded"));

        let violations = fixture.quota_store.violations(agent.owner_user_id);
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0]["type"], "rate_limit_minute");
    }
}
