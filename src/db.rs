//! PostgreSQL connection pooling.
//!
//! Builds a deadpool-postgres pool from configuration. Repositories borrow
//! connections per statement; nothing holds a connection across a loop
//! iteration.

use deadpool_postgres::{Config as PoolConfig, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;
use tracing::info;

use crate::config::DatabaseConfig;
use crate::error::Result;

/// Create a connection pool from configuration.
pub fn create_pool(cfg: &DatabaseConfig) -> Result<Pool> {
    let mut pool_cfg = PoolConfig::new();
    pool_cfg.host = Some(cfg.host.clone());
    pool_cfg.port = Some(cfg.port);
    pool_cfg.dbname = Some(cfg.dbname.clone());
    pool_cfg.user = Some(cfg.user.clone());
    pool_cfg.password = Some(cfg.password.clone());
    pool_cfg.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });

    let pool = pool_cfg.create_pool(Some(Runtime::Tokio1), NoTls)?;
    info!(
        host = %cfg.host,
        port = cfg.port,
        dbname = %cfg.dbname,
        "created database pool"
    );
    Ok(pool)
}
