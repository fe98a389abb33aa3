//! Inbound stanza handling.

use tracing::{debug, error};

use super::{IqStanza, MessageStanza, PresenceStanza, Stanza};
use crate::bus::{InboundMessage, Publisher};

/// Bridges stanzas to the event bus.
///
/// Returns the stanza to send back on the same connection, when the protocol
/// calls for an immediate reply (presence approval, ingress failures).
pub struct Handler {
    publisher: Publisher,
}

impl Handler {
    pub fn new(publisher: Publisher) -> Self {
        Self { publisher }
    }

    pub async fn handle_stanza(&self, stanza: Stanza) -> Option<Stanza> {
        match stanza {
            Stanza::Message(msg) => self.handle_message(msg).await,
            Stanza::Presence(presence) => Self::handle_presence(presence),
            Stanza::Iq(iq) => {
                Self::handle_iq(iq);
                None
            }
        }
    }

    async fn handle_message(&self, msg: MessageStanza) -> Option<Stanza> {
        if msg.body.is_empty() {
            return None;
        }

        debug!(from = %msg.from, to = %msg.to, stanza_type = %msg.stanza_type, "message received");

        let inbound = InboundMessage::new(&msg.from, &msg.to, &msg.body, &msg.stanza_type);
        if let Err(e) = self.publisher.inbound_message(&inbound).await {
            error!(error = %e, from = %msg.from, "publishing inbound message");
            return Some(Stanza::Message(MessageStanza::chat(
                &msg.to,
                &msg.from,
                "",
                "Internal error processing your message",
            )));
        }
        None
    }

    fn handle_presence(presence: PresenceStanza) -> Option<Stanza> {
        debug!(from = %presence.from, to = %presence.to, stanza_type = %presence.stanza_type, "presence received");
        if presence.stanza_type == "subscribe" {
            // Agents accept every subscription request.
            return Some(Stanza::Presence(PresenceStanza {
                from: presence.to,
                to: presence.from,
                stanza_type: "subscribed".to_string(),
            }));
        }
        None
    }

    fn handle_iq(iq: IqStanza) {
        debug!(from = %iq.from, to = %iq.to, stanza_type = %iq.stanza_type, "iq received");
    }
}
