//! Redis connection management.
//!
//! The key-value store backs the short-term conversation rings and the
//! sliding-minute rate windows. A single multiplexed connection manager is
//! shared by both; it reconnects transparently.

use redis::aio::ConnectionManager;
use tracing::info;

use crate::config::KvConfig;
use crate::error::Result;

/// Connect and return a cloneable connection manager.
pub async fn connect(cfg: &KvConfig) -> Result<ConnectionManager> {
    let client = redis::Client::open(cfg.url.as_str())?;
    let manager = client.get_connection_manager().await?;
    info!(url = %cfg.url, "connected to key-value store");
    Ok(manager)
}
