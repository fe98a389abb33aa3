//! Outbound relay: drains `aiox.messages.outbound` onto the component link.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error, info};

use super::{MessageStanza, Stanza, StanzaSender};
use crate::bus::{
    BusMessage, EventBus, OutboundMessage, StreamName, FETCH_BATCH, FETCH_MAX_WAIT,
    SUBJECT_OUTBOUND,
};
use crate::error::Result;

const DURABLE_NAME: &str = "outbound-relay";

pub struct OutboundRelay {
    bus: Arc<dyn EventBus>,
    sender: StanzaSender,
}

impl OutboundRelay {
    pub fn new(bus: Arc<dyn EventBus>, sender: StanzaSender) -> Self {
        Self { bus, sender }
    }

    /// Run the consume loop until shutdown. Send failures nak for retry.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut consumer = self
            .bus
            .ensure_consumer(StreamName::Messages, DURABLE_NAME, SUBJECT_OUTBOUND)
            .await?;
        info!(consumer = DURABLE_NAME, "outbound relay started");

        loop {
            if *shutdown.borrow() {
                info!("outbound relay stopped");
                return Ok(());
            }
            let batch = match consumer.fetch(FETCH_BATCH, FETCH_MAX_WAIT).await {
                Ok(batch) => batch,
                Err(e) => {
                    debug!(error = %e, "fetching outbound messages");
                    continue;
                }
            };
            for msg in batch {
                self.handle_outbound(msg).await;
            }
        }
    }

    async fn handle_outbound(&self, mut msg: Box<dyn BusMessage>) {
        let outbound: OutboundMessage = match serde_json::from_slice(msg.data()) {
            Ok(outbound) => outbound,
            Err(e) => {
                error!(error = %e, "decoding outbound message");
                let _ = msg.nak().await;
                return;
            }
        };

        let stanza = Stanza::Message(MessageStanza::chat(
            &outbound.from_address,
            &outbound.to_address,
            &outbound.id,
            &outbound.body,
        ));
        if let Err(e) = self.sender.send(stanza).await {
            error!(error = %e, to = %outbound.to_address, "sending outbound stanza");
            let _ = msg.nak().await;
            return;
        }

        debug!(to = %outbound.to_address, from = %outbound.from_address, "sent outbound stanza");
        let _ = msg.ack().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{MemoryBus, Publisher};
    use crate::xmpp::{Component, ComponentTransport, Handler, StanzaStream};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct SinkStream {
        sent: mpsc::UnboundedSender<Stanza>,
    }

    #[async_trait]
    impl StanzaStream for SinkStream {
        async fn recv(&mut self) -> Result<Option<Stanza>> {
            // Keep the connection open without producing stanzas.
            std::future::pending::<()>().await;
            unreachable!()
        }

        async fn send(&mut self, stanza: Stanza) -> Result<()> {
            self.sent
                .send(stanza)
                .map_err(|_| crate::error::AioxError::Xmpp("sink closed".into()))
        }
    }

    struct SinkTransport {
        streams: Mutex<VecDeque<SinkStream>>,
    }

    #[async_trait]
    impl ComponentTransport for SinkTransport {
        async fn connect(&self) -> Result<Box<dyn StanzaStream>> {
            match self.streams.lock().unwrap().pop_front() {
                Some(stream) => Ok(Box::new(stream)),
                None => Err(crate::error::AioxError::Xmpp("exhausted".into())),
            }
        }
    }

    #[tokio::test]
    async fn test_outbound_message_becomes_chat_stanza() {
        let bus = Arc::new(MemoryBus::new());
        let (sent_tx, mut sent_rx) = mpsc::unbounded_channel();
        let transport = SinkTransport {
            streams: Mutex::new(VecDeque::from([SinkStream { sent: sent_tx }])),
        };
        let handler = Handler::new(Publisher::new(bus.clone()));
        let (component, sender) = Component::new(Box::new(transport), handler);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let component_handle = tokio::spawn(component.run(shutdown_rx.clone()));

        let relay = Arc::new(OutboundRelay::new(bus.clone(), sender));
        let relay_handle = {
            let relay = relay.clone();
            let shutdown_rx = shutdown_rx.clone();
            tokio::spawn(async move { relay.run(shutdown_rx).await })
        };

        let publisher = Publisher::new(bus.clone());
        let outbound = OutboundMessage::reply("u@d", "agent-x@agents.d", "pong", "req-1");
        let outbound_id = outbound.id.clone();
        publisher.outbound_message(&outbound).await.unwrap();

        let stanza = tokio::time::timeout(Duration::from_secs(2), sent_rx.recv())
            .await
            .unwrap()
            .unwrap();
        match stanza {
            Stanza::Message(m) => {
                assert_eq!(m.to, "u@d");
                assert_eq!(m.from, "agent-x@agents.d");
                assert_eq!(m.body, "pong");
                assert_eq!(m.id, outbound_id);
                assert_eq!(m.stanza_type, "chat");
            }
            other => panic!("unexpected stanza {:?}", other),
        }

        shutdown_tx.send(true).unwrap();
        let _ = tokio::time::timeout(Duration::from_secs(2), relay_handle).await;
        let _ = tokio::time::timeout(Duration::from_secs(2), component_handle).await;
    }
}
