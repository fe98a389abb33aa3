//! Durable event bus for cross-subsystem messaging.
//!
//! All coordination between the ingress gateway, orchestrator, dispatcher,
//! relay, and audit persister flows through three subject-addressed streams
//! with at-least-once delivery. This module defines the contract the rest of
//! the platform consumes:
//!
//! - [`EventBus::publish`]: JSON envelope to a subject; fails if the bus
//!   is unreachable (callers treat that as transient).
//! - [`EventBus::ensure_consumer`]: create-or-update a named durable
//!   consumer with a filter subject.
//! - [`BusConsumer::fetch`]: batched pull with a bounded wait; each
//!   returned message must be explicitly acked or naked. A nak returns the
//!   message for redelivery.
//!
//! Two implementations exist: [`JetStreamBus`] talks to a NATS JetStream
//! deployment, and [`MemoryBus`] runs the same semantics in-process for
//! tests and the embedded storage mode.

pub mod events;
pub mod jetstream;
pub mod memory;
pub mod publisher;

pub use events::{
    task_subject, AgentEvent, AuditEvent, AuditEventType, AuditSeverity, InboundMessage,
    OutboundMessage, StreamName, TaskMessage, FETCH_BATCH, FETCH_MAX_WAIT, SUBJECT_AGENT_EVENT,
    SUBJECT_AUDIT_EVENT, SUBJECT_INBOUND, SUBJECT_OUTBOUND, SUBJECT_TASK_PREFIX,
};
pub use jetstream::JetStreamBus;
pub use memory::MemoryBus;
pub use publisher::Publisher;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// A durable, subject-addressed message log.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish a payload to a subject. The payload is an already-serialized
    /// JSON envelope.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()>;

    /// Create-or-update a named durable consumer on a stream. The durable
    /// name is the consumer's identity: reconnecting under the same name
    /// resumes from the last un-acked offset.
    async fn ensure_consumer(
        &self,
        stream: StreamName,
        durable_name: &str,
        filter_subject: &str,
    ) -> Result<Box<dyn BusConsumer>>;
}

/// A handle to a durable consumer.
#[async_trait]
pub trait BusConsumer: Send {
    /// Fetch up to `batch` messages, waiting at most `max_wait`. An empty
    /// result after the wait is normal, not an error.
    async fn fetch(&mut self, batch: usize, max_wait: Duration) -> Result<Vec<Box<dyn BusMessage>>>;
}

/// One fetched message awaiting an explicit acknowledgement.
#[async_trait]
pub trait BusMessage: Send {
    /// The raw payload bytes.
    fn data(&self) -> &[u8];

    /// Acknowledge: the message is done and (on work-queue streams) deleted.
    async fn ack(&mut self) -> Result<()>;

    /// Negative-acknowledge: return the message for redelivery.
    async fn nak(&mut self) -> Result<()>;
}
