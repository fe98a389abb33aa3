//! AIOX: a multi-tenant platform for conversational AI agents over XMPP.
//!
//! Users register agents that own a durable XMPP address, an encrypted
//! system prompt, a governance policy, and hybrid memory. Inbound chat is
//! routed through a durable event bus to the dispatcher, executed on a pool
//! of streaming workers, and the reply is relayed back over the same
//! transport.

pub mod agents;
pub mod app;
pub mod bus;
pub mod config;
pub mod crypto;
pub mod db;
pub mod error;
pub mod governance;
pub mod kv;
pub mod memory;
pub mod orchestrator;
pub mod utils;
pub mod worker;
pub mod xmpp;

pub use config::Config;
pub use error::{AioxError, Result};
