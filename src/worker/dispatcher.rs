//! Task dispatcher: the center of the pipeline.
//!
//! Three cooperating loops share one pending-task table:
//!
//! - the consume loop pulls task messages off the bus, gates them through
//!   governance, assembles memory context, selects a worker, and sends;
//! - the result loop drains the shared result channel, resolves pending
//!   entries, and fans out the side effects (outbound reply, execution
//!   record, quota deduction, memory writes, audit);
//! - the reaper bounds in-flight work, expiring entries older than the task
//!   timeout.
//!
//! The bus ack for a task happens only after the pending entry exists and
//! the worker counter is bumped (send → insert → increment → ack), so a
//! crash cannot ack work that nothing is tracking. The reverse window (a
//! response arriving for a request that was sent but never inserted) is
//! handled by dropping unknown request ids on the floor.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::executions::{Execution, ExecutionStatus, ExecutionStore};
use super::pool::WorkerPool;
use super::proto;
use crate::agents;
use crate::bus::{
    AuditEvent, AuditEventType, AuditSeverity, BusConsumer, BusMessage, EventBus,
    OutboundMessage, Publisher, StreamName, TaskMessage, FETCH_BATCH, FETCH_MAX_WAIT,
};
use crate::error::Result;
use crate::governance::{extract_provider, GovernancePolicy};
use crate::governance::quota;
use crate::memory::{self, MemoryPolicy};

const DURABLE_NAME: &str = "task-dispatcher";
const TASK_FILTER: &str = "aiox.tasks.>";
const REAPER_INTERVAL: Duration = Duration::from_secs(30);

/// Applied when the configured timeout is zero or negative.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(120);

/// Dispatcher-local record for a request in flight to a worker.
struct PendingTask {
    request_id: String,
    agent_id: Uuid,
    owner_user_id: Uuid,
    from_address: String,
    agent_address: String,
    worker_id: String,
    input: String,
    dispatched_at: Instant,
    memory_policy: MemoryPolicy,
}

pub struct Dispatcher {
    pool: Arc<WorkerPool>,
    bus: Arc<dyn EventBus>,
    publisher: Publisher,
    agents: Arc<agents::Service>,
    executions: Arc<dyn ExecutionStore>,
    memory: Arc<memory::Service>,
    quota: Arc<quota::Service>,
    task_timeout: Duration,
    pending: Mutex<HashMap<String, PendingTask>>,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: Arc<WorkerPool>,
        bus: Arc<dyn EventBus>,
        publisher: Publisher,
        agents: Arc<agents::Service>,
        executions: Arc<dyn ExecutionStore>,
        memory: Arc<memory::Service>,
        quota: Arc<quota::Service>,
        task_timeout_sec: i64,
    ) -> Self {
        let task_timeout = if task_timeout_sec <= 0 {
            DEFAULT_TASK_TIMEOUT
        } else {
            Duration::from_secs(task_timeout_sec as u64)
        };
        Self {
            pool,
            bus,
            publisher,
            agents,
            executions,
            memory,
            quota,
            task_timeout,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Number of requests currently between send and response/timeout.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Run all three loops until shutdown.
    pub async fn run(
        &self,
        result_rx: mpsc::Receiver<proto::TaskResponse>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let consumer = self
            .bus
            .ensure_consumer(StreamName::Tasks, DURABLE_NAME, TASK_FILTER)
            .await?;
        info!(timeout = ?self.task_timeout, "task dispatcher started");

        tokio::join!(
            self.consume_loop(consumer, shutdown.clone()),
            self.result_loop(result_rx, shutdown.clone()),
            self.reaper_loop(shutdown),
        );
        info!("task dispatcher stopped");
        Ok(())
    }

    async fn consume_loop(
        &self,
        mut consumer: Box<dyn BusConsumer>,
        shutdown: watch::Receiver<bool>,
    ) {
        loop {
            if *shutdown.borrow() {
                return;
            }
            let batch = match consumer.fetch(FETCH_BATCH, FETCH_MAX_WAIT).await {
                Ok(batch) => batch,
                Err(e) => {
                    debug!(error = %e, "fetching tasks");
                    continue;
                }
            };
            for msg in batch {
                self.handle_task(msg).await;
            }
        }
    }

    async fn result_loop(
        &self,
        mut result_rx: mpsc::Receiver<proto::TaskResponse>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
                response = result_rx.recv() => {
                    match response {
                        Some(response) => self.handle_result(response).await,
                        None => {
                            info!("result channel closed");
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn reaper_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(REAPER_INTERVAL);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
                _ = ticker.tick() => {
                    self.reap_expired().await;
                }
            }
        }
    }

    async fn handle_task(&self, mut msg: Box<dyn BusMessage>) {
        let task: TaskMessage = match serde_json::from_slice(msg.data()) {
            Ok(task) => task,
            Err(e) => {
                error!(error = %e, "decoding task message");
                let _ = msg.nak().await;
                return;
            }
        };

        // Enrich with the agent record (decrypted prompt comes later).
        let agent = match self.agents.get_by_id(task.agent_id).await {
            Ok(Some(agent)) => agent,
            Ok(None) => {
                warn!(agent_id = %task.agent_id, "agent not found at dispatch");
                self.send_error_reply(&task, "Agent not found").await;
                let _ = msg.ack().await;
                return;
            }
            Err(e) => {
                error!(error = %e, agent_id = %task.agent_id, "fetching agent");
                let _ = msg.nak().await;
                return;
            }
        };

        // Governance gate at dispatch time.
        let policy = GovernancePolicy::parse(&agent.governance);
        if policy.blocked {
            warn!(agent_id = %task.agent_id, "agent blocked by governance");
            self.reject_task(&task, "Agent is blocked by governance policy")
                .await;
            let _ = msg.ack().await;
            return;
        }
        if !policy.allowed_providers.is_empty() {
            if let Some(provider) = extract_provider(&agent.llm_config) {
                if !policy.provider_allowed(&provider) {
                    warn!(agent_id = %task.agent_id, provider = %provider, "provider not allowed");
                    self.reject_task(
                        &task,
                        &format!("LLM provider '{}' not allowed by governance policy", provider),
                    )
                    .await;
                    let _ = msg.ack().await;
                    return;
                }
            }
        }

        // Worker selection. No capacity → nak so the bus queues the retry.
        let Some(worker) = self.pool.select_worker() else {
            warn!(request_id = %task.request_id, "no workers available, nacking for retry");
            let _ = msg.nak().await;
            return;
        };

        let system_prompt = match self.agents.decrypt_system_prompt(&agent) {
            Ok(prompt) => prompt,
            Err(e) => {
                error!(agent_id = %task.agent_id, error = %e, "decrypting system prompt");
                self.send_error_reply(&task, "Agent configuration error").await;
                let _ = msg.ack().await;
                return;
            }
        };

        // Memory read path. The dispatch has no query embedding, so only the
        // short-term ring contributes; failures degrade to no context.
        let memory_policy = MemoryPolicy::parse(&agent.memory_policy);
        let mut memory_context_json = String::new();
        let mut memory_policy_json = String::new();
        if memory_policy.enabled {
            match self
                .memory
                .conversation_context(
                    task.owner_user_id,
                    task.agent_id,
                    &task.from_address,
                    &memory_policy,
                    None,
                )
                .await
            {
                Ok(context) => {
                    memory_context_json =
                        serde_json::to_string(&context).unwrap_or_default();
                }
                Err(e) => {
                    warn!(agent_id = %task.agent_id, error = %e, "fetching memory context");
                }
            }
            memory_policy_json = serde_json::to_string(&memory_policy).unwrap_or_default();
        }

        let request = proto::TaskRequest {
            request_id: task.request_id.clone(),
            agent_id: task.agent_id.to_string(),
            owner_user_id: task.owner_user_id.to_string(),
            user_message: task.message.clone(),
            system_prompt,
            llm_config_json: agent.llm_config.to_string(),
            from_address: task.from_address.clone(),
            agent_address: task.agent_address.clone(),
            agent_name: task.agent_name.clone(),
            memory_context_json,
            memory_policy_json,
        };

        if let Err(e) = worker
            .send(proto::ServerMessage {
                payload: Some(proto::server_message::Payload::TaskRequest(request)),
            })
            .await
        {
            error!(error = %e, worker_id = worker.worker_id(), "sending task to worker");
            let _ = msg.nak().await;
            return;
        }

        // Track before the bus ack so a crash can never ack untracked work.
        {
            let mut pending = self.pending.lock().unwrap();
            pending.insert(
                task.request_id.clone(),
                PendingTask {
                    request_id: task.request_id.clone(),
                    agent_id: task.agent_id,
                    owner_user_id: task.owner_user_id,
                    from_address: task.from_address.clone(),
                    agent_address: task.agent_address.clone(),
                    worker_id: worker.worker_id().to_string(),
                    input: task.message.clone(),
                    dispatched_at: Instant::now(),
                    memory_policy,
                },
            );
        }
        worker.increment_active();
        let _ = msg.ack().await;

        debug!(
            request_id = %task.request_id,
            agent_id = %task.agent_id,
            worker_id = worker.worker_id(),
            "task dispatched"
        );
    }

    async fn handle_result(&self, response: proto::TaskResponse) {
        let Some(pending) = self
            .pending
            .lock()
            .unwrap()
            .remove(&response.request_id)
        else {
            warn!(request_id = %response.request_id, "result for unknown request");
            return;
        };

        if let Some(worker) = self.pool.get(&response.worker_id) {
            worker.decrement_active();
        }

        let dispatch_latency_ms = pending.dispatched_at.elapsed().as_millis() as i64;
        let failed = !response.error_message.is_empty();
        let status = if failed {
            ExecutionStatus::Error
        } else {
            ExecutionStatus::Completed
        };
        let body = if failed {
            format!("Error processing your message: {}", response.error_message)
        } else {
            response.response_text.clone()
        };

        let outbound = OutboundMessage::reply(
            &pending.from_address,
            &pending.agent_address,
            &body,
            &pending.request_id,
        );
        if let Err(e) = self.publisher.outbound_message(&outbound).await {
            error!(error = %e, "publishing outbound reply");
        }

        let execution = Execution {
            id: Uuid::new_v4(),
            owner_user_id: pending.owner_user_id,
            agent_id: pending.agent_id,
            input: pending.input.clone(),
            output: response.response_text.clone(),
            tokens_used: i64::from(response.tokens_used),
            worker_id: response.worker_id.clone(),
            worker_latency_ms: response.duration_ms,
            dispatch_latency_ms,
            status,
            error_message: response.error_message.clone(),
            created_at: Utc::now(),
        };
        if let Err(e) = self.executions.record(&execution).await {
            error!(error = %e, "recording execution");
        }

        if status == ExecutionStatus::Completed && response.tokens_used > 0 {
            if let Err(e) = self
                .quota
                .deduct_tokens(pending.owner_user_id, i64::from(response.tokens_used))
                .await
            {
                warn!(user_id = %pending.owner_user_id, error = %e, "deducting tokens");
            }
        }

        if status == ExecutionStatus::Completed && pending.memory_policy.enabled {
            if let Err(e) = self
                .memory
                .store_conversation_turn(
                    pending.agent_id,
                    &pending.from_address,
                    &pending.input,
                    &response.response_text,
                    &pending.memory_policy,
                )
                .await
            {
                warn!(agent_id = %pending.agent_id, error = %e, "storing conversation turn");
            }

            if pending.memory_policy.long_term_enabled {
                for new_memory in &response.new_memories {
                    let metadata = if new_memory.metadata_json.is_empty() {
                        serde_json::json!({})
                    } else {
                        serde_json::from_str(&new_memory.metadata_json)
                            .unwrap_or_else(|_| serde_json::json!({}))
                    };
                    let embedding = if new_memory.embedding.is_empty() {
                        None
                    } else {
                        Some(new_memory.embedding.clone())
                    };
                    let row = memory::new_memory(
                        pending.owner_user_id,
                        pending.agent_id,
                        &new_memory.content,
                        embedding,
                        &new_memory.memory_type,
                        metadata,
                    );
                    if let Err(e) = self.memory.store_long_term(row).await {
                        warn!(agent_id = %pending.agent_id, error = %e, "storing long-term memory");
                    }
                }
            }
        }

        let (event_type, severity) = if failed {
            (AuditEventType::TaskFailed, AuditSeverity::Warn)
        } else {
            (AuditEventType::TaskCompleted, AuditSeverity::Info)
        };
        let audit = AuditEvent::new(
            pending.owner_user_id,
            event_type,
            severity,
            "agent",
            &pending.agent_id.to_string(),
            &format!(
                "Task processed by worker {}, model: {}",
                response.worker_id, response.model_used
            ),
        );
        if let Err(e) = self.publisher.audit_event(&audit).await {
            error!(error = %e, "publishing audit event");
        }

        debug!(
            request_id = %response.request_id,
            worker_id = %response.worker_id,
            status = %status,
            tokens = response.tokens_used,
            worker_latency_ms = response.duration_ms,
            dispatch_latency_ms = dispatch_latency_ms,
            "result processed"
        );
    }

    /// Expire pending entries older than the task timeout. The reaper is
    /// the only bound on in-flight work.
    pub async fn reap_expired(&self) {
        let expired: Vec<PendingTask> = {
            let mut pending = self.pending.lock().unwrap();
            let now = Instant::now();
            let stale: Vec<String> = pending
                .iter()
                .filter(|(_, task)| now.duration_since(task.dispatched_at) > self.task_timeout)
                .map(|(id, _)| id.clone())
                .collect();
            stale
                .into_iter()
                .filter_map(|id| pending.remove(&id))
                .collect()
        };

        for task in expired {
            warn!(request_id = %task.request_id, agent_id = %task.agent_id, "task timed out");

            let outbound = OutboundMessage::reply(
                &task.from_address,
                &task.agent_address,
                "Sorry, the request timed out. Please try again.",
                &task.request_id,
            );
            if let Err(e) = self.publisher.outbound_message(&outbound).await {
                error!(error = %e, "publishing timeout reply");
            }

            let execution = Execution {
                id: Uuid::new_v4(),
                owner_user_id: task.owner_user_id,
                agent_id: task.agent_id,
                input: task.input.clone(),
                output: String::new(),
                tokens_used: 0,
                worker_id: task.worker_id.clone(),
                worker_latency_ms: 0,
                dispatch_latency_ms: task.dispatched_at.elapsed().as_millis() as i64,
                status: ExecutionStatus::Timeout,
                error_message: format!(
                    "task timed out after {}s",
                    self.task_timeout.as_secs()
                ),
                created_at: Utc::now(),
            };
            if let Err(e) = self.executions.record(&execution).await {
                error!(error = %e, "recording timeout execution");
            }

            if let Some(worker) = self.pool.get(&task.worker_id) {
                worker.decrement_active();
            }

            let audit = AuditEvent::new(
                task.owner_user_id,
                AuditEventType::TaskFailed,
                AuditSeverity::Warn,
                "agent",
                &task.agent_id.to_string(),
                "task timed out",
            );
            if let Err(e) = self.publisher.audit_event(&audit).await {
                error!(error = %e, "publishing timeout audit event");
            }
        }
    }

    async fn send_error_reply(&self, task: &TaskMessage, reason: &str) {
        let outbound = OutboundMessage::reply(
            &task.from_address,
            &task.agent_address,
            &format!("Error: {}", reason),
            &task.request_id,
        );
        if let Err(e) = self.publisher.outbound_message(&outbound).await {
            error!(error = %e, "publishing error reply");
        }
    }

    /// Authorization rejection: explanatory reply plus a warn-severity audit.
    async fn reject_task(&self, task: &TaskMessage, reason: &str) {
        self.send_error_reply(task, reason).await;
        let audit = AuditEvent::new(
            task.owner_user_id,
            AuditEventType::TaskFailed,
            AuditSeverity::Warn,
            "agent",
            &task.agent_id.to_string(),
            reason,
        );
        if let Err(e) = self.publisher.audit_event(&audit).await {
            error!(error = %e, "publishing rejection audit event");
        }
    }

    #[cfg(test)]
    fn set_task_timeout(&mut self, timeout: Duration) {
        self.task_timeout = timeout;
    }
}
