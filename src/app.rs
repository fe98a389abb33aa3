//! Process wiring and lifecycle.
//!
//! Builds the storage backends selected by configuration, wires every loop,
//! and runs until interrupted. Shutdown follows a fixed order: flip the
//! shutdown signal, let the stream server drain, then wait for the loops
//! with a 15-second cap before giving up with a warning.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::agents;
use crate::bus::{EventBus, JetStreamBus, MemoryBus, Publisher};
use crate::config::{Config, StorageBackend};
use crate::db;
use crate::error::{AioxError, Result};
use crate::governance::audit::{AuditStore, MemoryAuditStore, Persister, PostgresAuditStore};
use crate::governance::quota::{
    self, MemoryQuotaStore, MemoryRateWindow, PostgresQuotaStore, QuotaStore, RateWindow,
    RedisRateWindow,
};
use crate::kv;
use crate::memory::{
    self, LongTermStore, MemoryLongTermStore, MemoryShortTermStore, PostgresLongTermStore,
    RedisShortTermStore, ShortTermStore,
};
use crate::orchestrator::{Orchestrator, Router, Validator};
use crate::worker::proto::worker_service_server::WorkerServiceServer;
use crate::worker::{
    ApiKeyInterceptor, Dispatcher, ExecutionStore, MemoryExecutionStore, MemoryWorkerRegistry,
    PostgresExecutionStore, PostgresWorkerRegistry, WorkerPool, WorkerRegistry,
    WorkerStreamServer,
};
use crate::xmpp::{Component, ComponentTransport, Handler, OutboundRelay};
use crate::agents::{AgentStore, MemoryAgentStore, PostgresAgentStore};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

struct Backends {
    bus: Arc<dyn EventBus>,
    agent_store: Arc<dyn AgentStore>,
    short_term: Arc<dyn ShortTermStore>,
    long_term: Arc<dyn LongTermStore>,
    quota_store: Arc<dyn QuotaStore>,
    rate_window: Arc<dyn RateWindow>,
    audit_store: Arc<dyn AuditStore>,
    worker_registry: Arc<dyn WorkerRegistry>,
    executions: Arc<dyn ExecutionStore>,
}

async fn connect_backends(cfg: &Config) -> Result<Backends> {
    match cfg.storage.backend {
        StorageBackend::Postgres => {
            let pool = db::create_pool(&cfg.database)?;
            let conn = kv::connect(&cfg.kv).await?;
            let bus = Arc::new(JetStreamBus::connect(&cfg.bus.url).await?);
            Ok(Backends {
                bus,
                agent_store: Arc::new(PostgresAgentStore::new(pool.clone())),
                short_term: Arc::new(RedisShortTermStore::new(conn.clone())),
                long_term: Arc::new(PostgresLongTermStore::new(pool.clone())),
                quota_store: Arc::new(PostgresQuotaStore::new(pool.clone())),
                rate_window: Arc::new(RedisRateWindow::new(conn)),
                audit_store: Arc::new(PostgresAuditStore::new(pool.clone())),
                worker_registry: Arc::new(PostgresWorkerRegistry::new(pool.clone())),
                executions: Arc::new(PostgresExecutionStore::new(pool)),
            })
        }
        StorageBackend::Memory => {
            info!("running with embedded storage");
            Ok(Backends {
                bus: Arc::new(MemoryBus::new()),
                agent_store: Arc::new(MemoryAgentStore::new()),
                short_term: Arc::new(MemoryShortTermStore::new()),
                long_term: Arc::new(MemoryLongTermStore::new()),
                quota_store: Arc::new(MemoryQuotaStore::new()),
                rate_window: Arc::new(MemoryRateWindow::new()),
                audit_store: Arc::new(MemoryAuditStore::new()),
                worker_registry: Arc::new(MemoryWorkerRegistry::new()),
                executions: Arc::new(MemoryExecutionStore::new()),
            })
        }
    }
}

/// Run the platform until ctrl-c.
///
/// `transport` is the component wire link. `None` runs the core headless:
/// the ingress gateway and outbound relay stay off and an external component
/// host is expected to publish and consume the message subjects.
pub async fn run(cfg: Config, transport: Option<Box<dyn ComponentTransport>>) -> Result<()> {
    let backends = connect_backends(&cfg).await?;
    let publisher = Publisher::new(backends.bus.clone());

    let agents = Arc::new(agents::Service::new(
        backends.agent_store.clone(),
        &cfg.encryption.key,
        &cfg.xmpp.domain,
    )?);
    let memory_svc = Arc::new(memory::Service::new(
        backends.short_term.clone(),
        backends.long_term.clone(),
    ));
    let quota_svc = Arc::new(quota::Service::new(
        backends.quota_store.clone(),
        backends.rate_window.clone(),
        cfg.governance.clone(),
    ));

    let pool = Arc::new(WorkerPool::new());
    let (stream_server, result_rx) =
        WorkerStreamServer::new(pool.clone(), backends.worker_registry.clone());

    let orchestrator = Arc::new(Orchestrator::new(
        backends.bus.clone(),
        publisher.clone(),
        Router::new(agents.clone()),
        Validator::new(),
        quota_svc.clone(),
    ));
    let dispatcher = Arc::new(Dispatcher::new(
        pool.clone(),
        backends.bus.clone(),
        publisher.clone(),
        agents.clone(),
        backends.executions.clone(),
        memory_svc.clone(),
        quota_svc.clone(),
        cfg.grpc.task_timeout_sec,
    ));
    let persister = Arc::new(Persister::new(
        backends.bus.clone(),
        backends.audit_store.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks: Vec<(&'static str, JoinHandle<()>)> = Vec::new();

    {
        let orchestrator = orchestrator.clone();
        let shutdown = shutdown_rx.clone();
        tasks.push((
            "orchestrator",
            tokio::spawn(async move {
                if let Err(e) = orchestrator.run(shutdown).await {
                    error!(error = %e, "orchestrator exited");
                }
            }),
        ));
    }
    {
        let dispatcher = dispatcher.clone();
        let shutdown = shutdown_rx.clone();
        tasks.push((
            "dispatcher",
            tokio::spawn(async move {
                if let Err(e) = dispatcher.run(result_rx, shutdown).await {
                    error!(error = %e, "dispatcher exited");
                }
            }),
        ));
    }
    {
        let persister = persister.clone();
        let shutdown = shutdown_rx.clone();
        tasks.push((
            "audit-persister",
            tokio::spawn(async move {
                if let Err(e) = persister.run(shutdown).await {
                    error!(error = %e, "audit persister exited");
                }
            }),
        ));
    }

    match transport {
        Some(transport) => {
            let handler = Handler::new(publisher.clone());
            let (component, stanza_sender) = Component::new(transport, handler);
            let relay = Arc::new(OutboundRelay::new(backends.bus.clone(), stanza_sender));

            let shutdown = shutdown_rx.clone();
            tasks.push((
                "xmpp-component",
                tokio::spawn(async move {
                    if let Err(e) = component.run(shutdown).await {
                        error!(error = %e, "xmpp component exited");
                    }
                }),
            ));
            let shutdown = shutdown_rx.clone();
            tasks.push((
                "outbound-relay",
                tokio::spawn(async move {
                    if let Err(e) = relay.run(shutdown).await {
                        error!(error = %e, "outbound relay exited");
                    }
                }),
            ));
        }
        None => {
            info!("no component transport configured; expecting an external ingress on the bus");
        }
    }

    let addr: SocketAddr = cfg
        .grpc
        .listen_addr
        .parse()
        .map_err(|e| AioxError::Config(format!("grpc.listen_addr: {}", e)))?;
    let interceptor = ApiKeyInterceptor::new(&cfg.grpc.worker_api_key);
    let mut grpc_shutdown = shutdown_rx.clone();
    let grpc = tonic::transport::Server::builder()
        .add_service(WorkerServiceServer::with_interceptor(stream_server, interceptor))
        .serve_with_shutdown(addr, async move {
            while grpc_shutdown.changed().await.is_ok() {
                if *grpc_shutdown.borrow() {
                    break;
                }
            }
        });
    tasks.push((
        "worker-stream-server",
        tokio::spawn(async move {
            if let Err(e) = grpc.await {
                error!(error = %e, "worker stream server exited");
            }
        }),
    ));
    info!(addr = %addr, "worker stream server listening");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let drain = async {
        for (name, handle) in tasks {
            if let Err(e) = handle.await {
                error!(task = name, error = %e, "joining task");
            }
        }
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!(grace = ?SHUTDOWN_GRACE, "shutdown grace period expired, exiting anyway");
    }
    info!("shutdown complete");
    Ok(())
}
