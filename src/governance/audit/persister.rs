//! Audit persister: drains `aiox.events.audit` into durable rows.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tracing::{debug, error, info};
use uuid::Uuid;

use super::model::AuditLog;
use super::store::AuditStore;
use crate::bus::{
    AuditEvent, BusMessage, EventBus, StreamName, FETCH_BATCH, FETCH_MAX_WAIT,
    SUBJECT_AUDIT_EVENT,
};
use crate::error::Result;

const DURABLE_NAME: &str = "audit-persister";

pub struct Persister {
    bus: Arc<dyn EventBus>,
    store: Arc<dyn AuditStore>,
}

impl Persister {
    pub fn new(bus: Arc<dyn EventBus>, store: Arc<dyn AuditStore>) -> Self {
        Self { bus, store }
    }

    /// Run the consume loop until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut consumer = self
            .bus
            .ensure_consumer(StreamName::Events, DURABLE_NAME, SUBJECT_AUDIT_EVENT)
            .await?;
        info!(consumer = DURABLE_NAME, "audit persister started");

        loop {
            if *shutdown.borrow() {
                info!("audit persister stopped");
                return Ok(());
            }
            let batch = match consumer.fetch(FETCH_BATCH, FETCH_MAX_WAIT).await {
                Ok(batch) => batch,
                Err(e) => {
                    debug!(error = %e, "fetching audit events");
                    continue;
                }
            };
            for msg in batch {
                self.handle_event(msg).await;
            }
        }
    }

    async fn handle_event(&self, mut msg: Box<dyn BusMessage>) {
        let event: AuditEvent = match serde_json::from_slice(msg.data()) {
            Ok(event) => event,
            Err(e) => {
                error!(error = %e, "decoding audit event");
                let _ = msg.nak().await;
                return;
            }
        };

        let log = AuditLog {
            id: Uuid::new_v4(),
            owner_user_id: event.owner_user_id,
            event_type: event.event_type.to_string(),
            severity: event.severity.to_string(),
            resource_type: event.resource_type.clone(),
            resource_id: Uuid::parse_str(&event.resource_id).ok(),
            details: serde_json::json!({ "message": event.details }),
            created_at: if event.timestamp.timestamp() != 0 {
                event.timestamp
            } else {
                Utc::now()
            },
        };

        if let Err(e) = self.store.insert(&log).await {
            error!(error = %e, event_type = %log.event_type, "persisting audit log");
            let _ = msg.nak().await;
            return;
        }
        let _ = msg.ack().await;

        debug!(
            event_type = %log.event_type,
            owner = %log.owner_user_id,
            "persisted audit event"
        );
    }
}
