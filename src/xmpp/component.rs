//! Component connection supervision.
//!
//! The component runs one connection at a time. Inbound stanzas go through
//! the handler; outbound stanzas arrive over an internal queue from the
//! relay and are written to whichever connection is live. Any stream error
//! tears the connection down and reconnects after a fixed backoff.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{error, info, warn};

use super::{ComponentTransport, Handler, Stanza, StanzaStream};
use crate::error::{AioxError, Result};

const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const OUTBOUND_QUEUE: usize = 128;

/// Cloneable handle for queueing stanzas onto the component connection.
///
/// Sends apply backpressure while the component is between connections; the
/// queue drains after reconnect.
#[derive(Clone)]
pub struct StanzaSender {
    tx: mpsc::Sender<Stanza>,
}

impl StanzaSender {
    pub async fn send(&self, stanza: Stanza) -> Result<()> {
        self.tx
            .send(stanza)
            .await
            .map_err(|_| AioxError::Xmpp("component is gone".to_string()))
    }
}

pub struct Component {
    transport: Box<dyn ComponentTransport>,
    handler: Handler,
    outbound_rx: mpsc::Receiver<Stanza>,
    reconnect_delay: Duration,
}

impl Component {
    pub fn new(transport: Box<dyn ComponentTransport>, handler: Handler) -> (Self, StanzaSender) {
        let (tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
        (
            Self {
                transport,
                handler,
                outbound_rx,
                reconnect_delay: RECONNECT_DELAY,
            },
            StanzaSender { tx },
        )
    }

    #[cfg(test)]
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Run the connect/read/write loop until shutdown.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        loop {
            if *shutdown.borrow() {
                return Ok(());
            }

            let mut conn = match self.transport.connect().await {
                Ok(conn) => {
                    info!("component connected");
                    conn
                }
                Err(e) => {
                    error!(error = %e, "component connect failed");
                    if self.wait_reconnect(&mut shutdown).await {
                        return Ok(());
                    }
                    continue;
                }
            };

            let lost = self.drive_connection(conn.as_mut(), &mut shutdown).await;
            if !lost {
                return Ok(());
            }
            warn!(delay = ?self.reconnect_delay, "component reconnecting");
            if self.wait_reconnect(&mut shutdown).await {
                return Ok(());
            }
        }
    }

    /// Pump one connection. Returns true when the connection was lost and a
    /// reconnect is due, false on shutdown.
    async fn drive_connection(
        &mut self,
        conn: &mut dyn StanzaStream,
        shutdown: &mut watch::Receiver<bool>,
    ) -> bool {
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return false;
                    }
                }
                outbound = self.outbound_rx.recv() => {
                    match outbound {
                        Some(stanza) => {
                            if let Err(e) = conn.send(stanza).await {
                                warn!(error = %e, "outbound send failed");
                                return true;
                            }
                        }
                        // Every sender handle dropped; nothing left to relay.
                        None => return false,
                    }
                }
                inbound = conn.recv() => {
                    match inbound {
                        Ok(Some(stanza)) => {
                            if let Some(reply) = self.handler.handle_stanza(stanza).await {
                                if let Err(e) = conn.send(reply).await {
                                    warn!(error = %e, "reply send failed");
                                    return true;
                                }
                            }
                        }
                        Ok(None) => {
                            warn!("component stream closed by peer");
                            return true;
                        }
                        Err(e) => {
                            error!(error = %e, "component stream error");
                            return true;
                        }
                    }
                }
            }
        }
    }

    /// Sleep out the backoff. Returns true when shutdown fired meanwhile.
    async fn wait_reconnect(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = shutdown.changed() => *shutdown.borrow(),
            _ = sleep(self.reconnect_delay) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{
        BusConsumer, EventBus, InboundMessage, MemoryBus, Publisher, StreamName, SUBJECT_INBOUND,
    };
    use crate::xmpp::{MessageStanza, PresenceStanza};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    struct ScriptedStream {
        inbound: mpsc::Receiver<Stanza>,
        sent: mpsc::UnboundedSender<Stanza>,
    }

    #[async_trait]
    impl StanzaStream for ScriptedStream {
        async fn recv(&mut self) -> Result<Option<Stanza>> {
            Ok(self.inbound.recv().await)
        }

        async fn send(&mut self, stanza: Stanza) -> Result<()> {
            self.sent
                .send(stanza)
                .map_err(|_| AioxError::Xmpp("test sink closed".into()))
        }
    }

    struct ScriptedTransport {
        streams: Mutex<VecDeque<ScriptedStream>>,
    }

    #[async_trait]
    impl ComponentTransport for ScriptedTransport {
        async fn connect(&self) -> Result<Box<dyn StanzaStream>> {
            match self.streams.lock().unwrap().pop_front() {
                Some(stream) => Ok(Box::new(stream)),
                None => Err(AioxError::Xmpp("no more connections".into())),
            }
        }
    }

    struct Harness {
        stanza_tx: mpsc::Sender<Stanza>,
        sent_rx: mpsc::UnboundedReceiver<Stanza>,
        sender: StanzaSender,
        shutdown_tx: watch::Sender<bool>,
        handle: tokio::task::JoinHandle<Result<()>>,
        bus: Arc<MemoryBus>,
    }

    fn start_component() -> Harness {
        let (stanza_tx, inbound) = mpsc::channel(16);
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let transport = ScriptedTransport {
            streams: Mutex::new(VecDeque::from([ScriptedStream {
                inbound,
                sent: sent_tx,
            }])),
        };

        let bus = Arc::new(MemoryBus::new());
        let handler = Handler::new(Publisher::new(bus.clone()));
        let (component, sender) = Component::new(Box::new(transport), handler);
        let component = component.with_reconnect_delay(Duration::from_millis(10));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(component.run(shutdown_rx));

        Harness {
            stanza_tx,
            sent_rx,
            sender,
            shutdown_tx,
            handle,
            bus,
        }
    }

    async fn drain_inbound(bus: &Arc<MemoryBus>) -> Vec<InboundMessage> {
        let mut consumer: Box<dyn BusConsumer> = bus
            .ensure_consumer(StreamName::Messages, "orchestrator", SUBJECT_INBOUND)
            .await
            .unwrap();
        let mut out = Vec::new();
        let mut batch = consumer.fetch(10, Duration::from_millis(100)).await.unwrap();
        for msg in &mut batch {
            out.push(serde_json::from_slice(msg.data()).unwrap());
            msg.ack().await.unwrap();
        }
        out
    }

    #[tokio::test]
    async fn test_inbound_message_reaches_bus() {
        let mut harness = start_component();
        harness
            .stanza_tx
            .send(Stanza::Message(MessageStanza::chat(
                "u@d",
                "agent-x@agents.d",
                "m1",
                "hello",
            )))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        let inbound = drain_inbound(&harness.bus).await;
        assert_eq!(inbound.len(), 1);
        assert_eq!(inbound[0].body, "hello");

        harness.shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), harness.handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        drop(harness.sent_rx);
    }

    #[tokio::test]
    async fn test_subscribe_answered_on_same_connection() {
        let mut harness = start_component();
        harness
            .stanza_tx
            .send(Stanza::Presence(PresenceStanza {
                from: "u@d".into(),
                to: "agent-x@agents.d".into(),
                stanza_type: "subscribe".into(),
            }))
            .await
            .unwrap();

        let reply = tokio::time::timeout(Duration::from_secs(2), harness.sent_rx.recv())
            .await
            .unwrap()
            .unwrap();
        match reply {
            Stanza::Presence(p) => assert_eq!(p.stanza_type, "subscribed"),
            other => panic!("unexpected reply {:?}", other),
        }

        harness.shutdown_tx.send(true).unwrap();
        let _ = tokio::time::timeout(Duration::from_secs(2), harness.handle).await;
    }

    #[tokio::test]
    async fn test_outbound_queue_flows_to_connection() {
        let mut harness = start_component();
        harness
            .sender
            .send(Stanza::Message(MessageStanza::chat(
                "agent-x@agents.d",
                "u@d",
                "out-1",
                "pong",
            )))
            .await
            .unwrap();

        let sent = tokio::time::timeout(Duration::from_secs(2), harness.sent_rx.recv())
            .await
            .unwrap()
            .unwrap();
        match sent {
            Stanza::Message(m) => {
                assert_eq!(m.id, "out-1");
                assert_eq!(m.body, "pong");
            }
            other => panic!("unexpected stanza {:?}", other),
        }

        harness.shutdown_tx.send(true).unwrap();
        let _ = tokio::time::timeout(Duration::from_secs(2), harness.handle).await;
    }
}
