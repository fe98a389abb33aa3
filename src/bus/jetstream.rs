//! JetStream-backed implementation of the event bus contract.
//!
//! Connecting declares the three platform streams idempotently
//! (create-or-update), so any process can start first. Consumers are durable
//! and named with explicit ack policy; fetches are batched pulls with a
//! bounded wait.

use std::time::Duration;

use async_nats::jetstream;
use async_nats::jetstream::consumer::{pull, AckPolicy, PullConsumer};
use async_nats::jetstream::stream::RetentionPolicy;
use async_nats::jetstream::AckKind;
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, info};

use super::{BusConsumer, BusMessage, EventBus, StreamName};
use crate::error::{AioxError, Result};

const ALL_STREAMS: [StreamName; 3] = [StreamName::Messages, StreamName::Tasks, StreamName::Events];

/// Event bus over a NATS JetStream deployment.
pub struct JetStreamBus {
    context: jetstream::Context,
}

impl JetStreamBus {
    /// Connect to the broker and ensure the platform streams exist.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| AioxError::Bus(format!("connecting to {}: {}", url, e)))?;
        let context = jetstream::new(client);
        let bus = Self { context };
        bus.ensure_streams().await?;
        info!(url = url, "connected to event bus");
        Ok(bus)
    }

    async fn ensure_streams(&self) -> Result<()> {
        for stream in ALL_STREAMS {
            let retention = if stream.is_work_queue() {
                RetentionPolicy::WorkQueue
            } else {
                RetentionPolicy::Limits
            };
            self.context
                .get_or_create_stream(jetstream::stream::Config {
                    name: stream.as_str().to_string(),
                    subjects: vec![stream.wildcard().to_string()],
                    retention,
                    max_age: stream.max_age(),
                    ..Default::default()
                })
                .await
                .map_err(|e| {
                    AioxError::Bus(format!("ensuring stream {}: {}", stream.as_str(), e))
                })?;
            debug!(stream = stream.as_str(), "ensured stream");
        }
        Ok(())
    }
}

#[async_trait]
impl EventBus for JetStreamBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()> {
        let ack = self
            .context
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| AioxError::Bus(format!("publishing to {}: {}", subject, e)))?;
        ack.await
            .map_err(|e| AioxError::Bus(format!("publish ack for {}: {}", subject, e)))?;
        Ok(())
    }

    async fn ensure_consumer(
        &self,
        stream: StreamName,
        durable_name: &str,
        filter_subject: &str,
    ) -> Result<Box<dyn BusConsumer>> {
        let stream_handle = self
            .context
            .get_stream(stream.as_str())
            .await
            .map_err(|e| AioxError::Bus(format!("getting stream {}: {}", stream.as_str(), e)))?;

        let consumer: PullConsumer = stream_handle
            .get_or_create_consumer(
                durable_name,
                pull::Config {
                    durable_name: Some(durable_name.to_string()),
                    filter_subject: filter_subject.to_string(),
                    ack_policy: AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| {
                AioxError::Bus(format!(
                    "ensuring consumer {} on {}: {}",
                    durable_name,
                    stream.as_str(),
                    e
                ))
            })?;

        Ok(Box::new(JetStreamConsumer { consumer }))
    }
}

struct JetStreamConsumer {
    consumer: PullConsumer,
}

#[async_trait]
impl BusConsumer for JetStreamConsumer {
    async fn fetch(&mut self, batch: usize, max_wait: Duration) -> Result<Vec<Box<dyn BusMessage>>> {
        let mut messages = self
            .consumer
            .fetch()
            .max_messages(batch)
            .expires(max_wait)
            .messages()
            .await
            .map_err(|e| AioxError::Bus(format!("fetching batch: {}", e)))?;

        let mut out: Vec<Box<dyn BusMessage>> = Vec::new();
        while let Some(msg) = messages.next().await {
            let msg = msg.map_err(|e| AioxError::Bus(format!("fetch stream: {}", e)))?;
            out.push(Box::new(JetStreamMessage { inner: msg }));
        }
        Ok(out)
    }
}

struct JetStreamMessage {
    inner: jetstream::Message,
}

#[async_trait]
impl BusMessage for JetStreamMessage {
    fn data(&self) -> &[u8] {
        &self.inner.payload
    }

    async fn ack(&mut self) -> Result<()> {
        self.inner
            .ack()
            .await
            .map_err(|e| AioxError::Bus(format!("ack: {}", e)))
    }

    async fn nak(&mut self) -> Result<()> {
        self.inner
            .ack_with(AckKind::Nak(None))
            .await
            .map_err(|e| AioxError::Bus(format!("nak: {}", e)))
    }
}
