//! Hybrid memory: a short-term conversation ring per (agent, user) pair and
//! a long-term vector-searchable store per (owner, agent) pair.
//!
//! The two halves share tenancy scope but never mix data: short-term keys
//! embed the agent id and user address, long-term predicates always carry
//! both owner and agent ids.

mod long_term;
mod model;
mod policy;
mod service;
mod short_term;

pub use long_term::{new_memory, LongTermStore, MemoryLongTermStore, PostgresLongTermStore};
pub use model::{
    ContextPayload, ConversationEntry, Memory, RelevantMemory, Role, SearchResult,
};
pub use policy::MemoryPolicy;
pub use service::Service;
pub use short_term::{MemoryShortTermStore, RedisShortTermStore, ShortTermStore};
