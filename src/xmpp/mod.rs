//! XMPP ingress gateway.
//!
//! The platform attaches to an XMPP server as an external component owning
//! the `agents.<domain>` subdomain. Stanza wire framing is an external
//! collaborator: the component drives a [`ComponentTransport`], which yields
//! already-framed [`Stanza`] values. Everything above that seam lives here:
//! connection supervision with reconnect, inbound handling, presence
//! auto-approval, and the outbound relay.

mod component;
mod handler;
mod outbound;

pub use component::{Component, StanzaSender};
pub use handler::Handler;
pub use outbound::OutboundRelay;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{AioxError, Result};

/// A `<message>` stanza.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageStanza {
    pub from: String,
    pub to: String,
    pub id: String,
    pub stanza_type: String,
    pub body: String,
}

impl MessageStanza {
    /// A chat message with an explicit stanza id.
    pub fn chat(from: &str, to: &str, id: &str, body: &str) -> Self {
        Self {
            from: from.to_string(),
            to: to.to_string(),
            id: id.to_string(),
            stanza_type: "chat".to_string(),
            body: body.to_string(),
        }
    }
}

/// A `<presence>` stanza.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceStanza {
    pub from: String,
    pub to: String,
    pub stanza_type: String,
}

/// An `<iq>` stanza. Logged and dropped by the handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IqStanza {
    pub from: String,
    pub to: String,
    pub stanza_type: String,
}

/// One framed stanza crossing the component boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Stanza {
    Message(MessageStanza),
    Presence(PresenceStanza),
    Iq(IqStanza),
}

/// Connection factory for the component link.
///
/// Implementations own the wire protocol (dialing, the component handshake,
/// stanza framing). Each successful `connect` yields a fresh duplex stream.
#[async_trait]
pub trait ComponentTransport: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn StanzaStream>>;
}

/// One live component connection.
#[async_trait]
pub trait StanzaStream: Send {
    /// Next inbound stanza; `Ok(None)` means the peer closed the stream.
    async fn recv(&mut self) -> Result<Option<Stanza>>;
    async fn send(&mut self, stanza: Stanza) -> Result<()>;
}

/// Strip the resource part from an address.
pub fn bare_address(address: &str) -> &str {
    match address.find('/') {
        Some(idx) => &address[..idx],
        None => address,
    }
}

/// The domain portion of a bare address.
pub fn domain_part(address: &str) -> &str {
    let bare = bare_address(address);
    match bare.find('@') {
        Some(idx) => &bare[idx + 1..],
        None => bare,
    }
}

/// Parse the agent id out of an `agent-<uuid>@…` address.
///
/// Resource parts are ignored; anything whose local part does not follow the
/// `agent-<uuid>` shape is a routing failure.
pub fn parse_agent_address(address: &str) -> Result<Uuid> {
    let bare = bare_address(address);
    let local = match bare.find('@') {
        Some(idx) => &bare[..idx],
        None => bare,
    };
    let id = local.strip_prefix("agent-").ok_or_else(|| {
        AioxError::InvalidAddress(format!("{} does not match agent-<uuid> format", address))
    })?;
    Uuid::parse_str(id)
        .map_err(|e| AioxError::InvalidAddress(format!("invalid agent id in {}: {}", address, e)))
}
