//! Worker attachment and task dispatch.
//!
//! External AI workers connect over a bidirectional stream, register, and
//! execute task requests. The pool tracks live connections and load; the
//! dispatcher owns the pending-task table and drives the whole request
//! lifecycle from bus consumption to terminal outcome.

mod auth;
mod dispatcher;
mod executions;
mod pool;
mod registry;
mod server;

/// Generated stream protocol types.
pub mod proto {
    tonic::include_proto!("aiox.worker.v1");
}

pub use auth::{ApiKeyInterceptor, API_KEY_HEADER};
pub use dispatcher::{Dispatcher, DEFAULT_TASK_TIMEOUT};
pub use executions::{
    Execution, ExecutionStatus, ExecutionStore, MemoryExecutionStore, PostgresExecutionStore,
};
pub use pool::{ConnectedWorker, WorkerPool, DEFAULT_MAX_CONCURRENT};
pub use registry::{
    MemoryWorkerRegistry, PostgresWorkerRegistry, WorkerRecord, WorkerRegistry,
};
pub use server::{WorkerStreamServer, RESULT_CHANNEL_CAPACITY};
