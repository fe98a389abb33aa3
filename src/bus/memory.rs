//! In-process event bus with at-least-once semantics.
//!
//! `MemoryBus` implements the full bus contract (durable named consumers,
//! explicit ack/nak, work-queue retention, filter subjects with NATS-style
//! wildcards) over process-local state. It backs the `memory` storage mode
//! and every integration test; nothing in the consuming code can tell it
//! apart from the JetStream implementation.
//!
//! Durability here means durable relative to the process: consumer cursors
//! survive reconnects under the same durable name, not a process restart.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{BusConsumer, BusMessage, EventBus, StreamName};
use crate::error::{AioxError, Result};

/// Returns true when `subject` matches a NATS-style filter (`*` matches one
/// token, a trailing `>` matches the rest).
fn subject_matches(filter: &str, subject: &str) -> bool {
    let mut filter_tokens = filter.split('.');
    let mut subject_tokens = subject.split('.');
    loop {
        match (filter_tokens.next(), subject_tokens.next()) {
            (Some(">"), _) => return true,
            (Some("*"), Some(_)) => continue,
            (Some(f), Some(s)) if f == s => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

struct StoredMessage {
    subject: String,
    payload: Arc<Vec<u8>>,
}

#[derive(Default)]
struct ConsumerState {
    filter: String,
    /// Sequence numbers available for delivery, in publish order.
    available: BTreeSet<u64>,
    /// Delivered but not yet acked/naked.
    inflight: HashSet<u64>,
}

struct StreamState {
    next_seq: u64,
    messages: BTreeMap<u64, StoredMessage>,
    consumers: HashMap<String, ConsumerState>,
}

impl StreamState {
    fn new() -> Self {
        Self {
            next_seq: 1,
            messages: BTreeMap::new(),
            consumers: HashMap::new(),
        }
    }
}

struct Inner {
    streams: Mutex<HashMap<StreamName, StreamState>>,
    notify: Notify,
}

impl Inner {
    fn settle_ack(&self, stream: StreamName, durable: &str, seq: u64) {
        let mut streams = self.streams.lock().unwrap();
        if let Some(state) = streams.get_mut(&stream) {
            if let Some(consumer) = state.consumers.get_mut(durable) {
                consumer.inflight.remove(&seq);
            }
            if stream.is_work_queue() {
                state.messages.remove(&seq);
            }
        }
    }

    fn settle_nak(&self, stream: StreamName, durable: &str, seq: u64) {
        let mut streams = self.streams.lock().unwrap();
        if let Some(state) = streams.get_mut(&stream) {
            if let Some(consumer) = state.consumers.get_mut(durable) {
                if consumer.inflight.remove(&seq) && state.messages.contains_key(&seq) {
                    consumer.available.insert(seq);
                }
            }
        }
        self.notify.notify_waiters();
    }
}

/// Process-local [`EventBus`] implementation.
#[derive(Clone)]
pub struct MemoryBus {
    inner: Arc<Inner>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                streams: Mutex::new(HashMap::new()),
                notify: Notify::new(),
            }),
        }
    }
}

impl Default for MemoryBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for MemoryBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<()> {
        let stream = StreamName::for_subject(subject)
            .ok_or_else(|| AioxError::Bus(format!("no stream owns subject {}", subject)))?;

        {
            let mut streams = self.inner.streams.lock().unwrap();
            let state = streams.entry(stream).or_insert_with(StreamState::new);
            let seq = state.next_seq;
            state.next_seq += 1;
            state.messages.insert(
                seq,
                StoredMessage {
                    subject: subject.to_string(),
                    payload: Arc::new(payload),
                },
            );
            for consumer in state.consumers.values_mut() {
                if subject_matches(&consumer.filter, subject) {
                    consumer.available.insert(seq);
                }
            }
        }
        self.inner.notify.notify_waiters();
        Ok(())
    }

    async fn ensure_consumer(
        &self,
        stream: StreamName,
        durable_name: &str,
        filter_subject: &str,
    ) -> Result<Box<dyn BusConsumer>> {
        let mut streams = self.inner.streams.lock().unwrap();
        let state = streams.entry(stream).or_insert_with(StreamState::new);
        if !state.consumers.contains_key(durable_name) {
            // Seed a brand-new durable with the existing backlog.
            let mut consumer = ConsumerState {
                filter: filter_subject.to_string(),
                ..Default::default()
            };
            for (seq, msg) in &state.messages {
                if subject_matches(filter_subject, &msg.subject) {
                    consumer.available.insert(*seq);
                }
            }
            state.consumers.insert(durable_name.to_string(), consumer);
        } else if let Some(consumer) = state.consumers.get_mut(durable_name) {
            consumer.filter = filter_subject.to_string();
        }
        drop(streams);

        Ok(Box::new(MemoryBusConsumer {
            inner: Arc::clone(&self.inner),
            stream,
            durable: durable_name.to_string(),
        }))
    }
}

struct MemoryBusConsumer {
    inner: Arc<Inner>,
    stream: StreamName,
    durable: String,
}

impl MemoryBusConsumer {
    fn take_batch(&self, batch: usize) -> Vec<Box<dyn BusMessage>> {
        let mut streams = self.inner.streams.lock().unwrap();
        let Some(state) = streams.get_mut(&self.stream) else {
            return Vec::new();
        };
        let seqs: Vec<u64> = match state.consumers.get(&self.durable) {
            Some(consumer) => consumer.available.iter().take(batch).copied().collect(),
            None => return Vec::new(),
        };

        let mut out: Vec<Box<dyn BusMessage>> = Vec::with_capacity(seqs.len());
        for seq in seqs {
            let payload = state.messages.get(&seq).map(|m| Arc::clone(&m.payload));
            let Some(consumer) = state.consumers.get_mut(&self.durable) else {
                break;
            };
            consumer.available.remove(&seq);
            let Some(payload) = payload else {
                // The message was already deleted by another consumer's ack.
                continue;
            };
            consumer.inflight.insert(seq);
            out.push(Box::new(MemoryBusMessage {
                inner: Arc::clone(&self.inner),
                stream: self.stream,
                durable: self.durable.clone(),
                seq,
                payload,
                settled: false,
            }));
        }
        out
    }
}

#[async_trait]
impl BusConsumer for MemoryBusConsumer {
    async fn fetch(&mut self, batch: usize, max_wait: Duration) -> Result<Vec<Box<dyn BusMessage>>> {
        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            let msgs = self.take_batch(batch);
            if !msgs.is_empty() {
                return Ok(msgs);
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            let _ = tokio::time::timeout_at(deadline, self.inner.notify.notified()).await;
        }
    }
}

struct MemoryBusMessage {
    inner: Arc<Inner>,
    stream: StreamName,
    durable: String,
    seq: u64,
    payload: Arc<Vec<u8>>,
    settled: bool,
}

#[async_trait]
impl BusMessage for MemoryBusMessage {
    fn data(&self) -> &[u8] {
        &self.payload
    }

    async fn ack(&mut self) -> Result<()> {
        if !self.settled {
            self.settled = true;
            self.inner.settle_ack(self.stream, &self.durable, self.seq);
        }
        Ok(())
    }

    async fn nak(&mut self) -> Result<()> {
        if !self.settled {
            self.settled = true;
            self.inner.settle_nak(self.stream, &self.durable, self.seq);
        }
        Ok(())
    }
}

impl Drop for MemoryBusMessage {
    // A message dropped without a verdict goes back for redelivery, the
    // same way an ack-wait expiry would on a real broker.
    fn drop(&mut self) {
        if !self.settled {
            self.inner.settle_nak(self.stream, &self.durable, self.seq);
        }
    }
}
