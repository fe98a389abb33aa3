//! Audit trail: events emitted on the bus, drained into durable rows.

mod model;
mod persister;
mod store;

pub use model::AuditLog;
pub use persister::Persister;
pub use store::{AuditStore, MemoryAuditStore, PostgresAuditStore};
