//! Bidirectional stream endpoint for external workers.
//!
//! Protocol: the first worker frame must be `RegisterWorker`; the server
//! answers with a `RegisterAck` and, when accepted, keeps the stream open:
//! task requests flow down, task responses flow up. Responses from every
//! worker stream funnel into one bounded result channel whose sole consumer
//! is the dispatcher; a full channel blocks the stream reader, which is the
//! pool's admission control.

use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, error, info, warn};

use super::pool::{ConnectedWorker, WorkerPool, DEFAULT_MAX_CONCURRENT};
use super::proto;
use super::proto::worker_service_server::WorkerService;
use super::registry::WorkerRegistry;

/// Depth of the shared result channel.
pub const RESULT_CHANNEL_CAPACITY: usize = 256;

/// Per-worker outbound queue depth.
const WORKER_SEND_QUEUE: usize = 32;

fn register_ack(accepted: bool, message: &str) -> proto::ServerMessage {
    proto::ServerMessage {
        payload: Some(proto::server_message::Payload::RegisterAck(
            proto::RegisterAck {
                accepted,
                message: message.to_string(),
            },
        )),
    }
}

pub struct WorkerStreamServer {
    pool: Arc<WorkerPool>,
    registry: Arc<dyn WorkerRegistry>,
    result_tx: mpsc::Sender<proto::TaskResponse>,
}

impl WorkerStreamServer {
    /// Build the server and hand back the receive side of the result
    /// channel for the dispatcher.
    pub fn new(
        pool: Arc<WorkerPool>,
        registry: Arc<dyn WorkerRegistry>,
    ) -> (Self, mpsc::Receiver<proto::TaskResponse>) {
        let (result_tx, result_rx) = mpsc::channel(RESULT_CHANNEL_CAPACITY);
        (
            Self {
                pool,
                registry,
                result_tx,
            },
            result_rx,
        )
    }

    /// A response stream that delivers one rejection ack and ends.
    fn rejection_stream(
        message: &str,
    ) -> Pin<Box<dyn Stream<Item = Result<proto::ServerMessage, Status>> + Send>> {
        let (tx, rx) = mpsc::channel(1);
        // The permit is immediate on a fresh channel.
        let ack = register_ack(false, message);
        tokio::spawn(async move {
            let _ = tx.send(ack).await;
        });
        Box::pin(ReceiverStream::new(rx).map(Ok))
    }
}

#[tonic::async_trait]
impl WorkerService for WorkerStreamServer {
    type TaskStreamStream =
        Pin<Box<dyn Stream<Item = Result<proto::ServerMessage, Status>> + Send>>;

    async fn task_stream(
        &self,
        request: Request<Streaming<proto::WorkerMessage>>,
    ) -> Result<Response<Self::TaskStreamStream>, Status> {
        let mut inbound = request.into_inner();

        let first = inbound
            .message()
            .await?
            .ok_or_else(|| Status::cancelled("stream closed before registration"))?;

        let registration = match first.payload {
            Some(proto::worker_message::Payload::Register(registration)) => registration,
            _ => {
                warn!("worker stream: first message was not RegisterWorker");
                return Ok(Response::new(Self::rejection_stream(
                    "first message must be RegisterWorker",
                )));
            }
        };

        let max_concurrent = if registration.max_concurrent <= 0 {
            DEFAULT_MAX_CONCURRENT
        } else {
            registration.max_concurrent
        };

        let (tx, rx) = mpsc::channel(WORKER_SEND_QUEUE);
        let worker = Arc::new(ConnectedWorker::new(
            &registration.worker_id,
            max_concurrent,
            registration.supported_providers.clone(),
            tx.clone(),
        ));

        if !self.pool.register(worker) {
            warn!(worker_id = %registration.worker_id, "worker already registered");
            return Ok(Response::new(Self::rejection_stream(
                "worker_id already registered",
            )));
        }

        info!(
            worker_id = %registration.worker_id,
            max_concurrent = max_concurrent,
            providers = ?registration.supported_providers,
            "worker registered"
        );

        let capabilities = serde_json::json!({
            "providers": registration.supported_providers,
            "max_concurrent": max_concurrent,
        });
        if let Err(e) = self.registry.upsert(&registration.worker_id, capabilities).await {
            error!(error = %e, "upserting worker registry row");
        }

        if tx.send(register_ack(true, "registered")).await.is_err() {
            self.pool.unregister(&registration.worker_id);
            return Err(Status::internal("worker stream send queue closed"));
        }

        // Dedicated reader: responses from this stream fan into the shared
        // result channel until EOF or error, then the worker deregisters.
        let worker_id = registration.worker_id.clone();
        let pool = Arc::clone(&self.pool);
        let registry = Arc::clone(&self.registry);
        let result_tx = self.result_tx.clone();
        tokio::spawn(async move {
            loop {
                match inbound.message().await {
                    Ok(Some(msg)) => match msg.payload {
                        Some(proto::worker_message::Payload::TaskResponse(mut response)) => {
                            response.worker_id = worker_id.clone();
                            if result_tx.send(response).await.is_err() {
                                warn!(worker_id = %worker_id, "result channel closed");
                                break;
                            }
                        }
                        _ => {
                            debug!(worker_id = %worker_id, "ignoring unexpected worker frame");
                        }
                    },
                    Ok(None) => {
                        info!(worker_id = %worker_id, "worker disconnected");
                        break;
                    }
                    Err(e) => {
                        warn!(worker_id = %worker_id, error = %e, "worker stream error");
                        break;
                    }
                }
            }

            pool.unregister(&worker_id);
            if let Err(e) = registry.mark_offline(&worker_id).await {
                error!(error = %e, worker_id = %worker_id, "marking worker offline");
            }
            info!(worker_id = %worker_id, "worker unregistered");
        });

        Ok(Response::new(Box::pin(ReceiverStream::new(rx).map(Ok))))
    }

    async fn heartbeat(
        &self,
        request: Request<proto::HeartbeatRequest>,
    ) -> Result<Response<proto::HeartbeatResponse>, Status> {
        let req = request.into_inner();
        if let Err(e) = self
            .registry
            .update_heartbeat(
                &req.worker_id,
                req.active_tasks,
                req.avg_latency_ms,
                req.memory_usage_mb,
            )
            .await
        {
            error!(error = %e, worker_id = %req.worker_id, "updating heartbeat");
        }
        Ok(Response::new(proto::HeartbeatResponse { ok: true }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::registry::MemoryWorkerRegistry;

    #[tokio::test]
    async fn test_heartbeat_updates_registry() {
        let pool = Arc::new(WorkerPool::new());
        let registry = Arc::new(MemoryWorkerRegistry::new());
        let (server, _result_rx) = WorkerStreamServer::new(pool, registry.clone());

        registry
            .upsert("w1", serde_json::json!({}))
            .await
            .unwrap();

        let response = server
            .heartbeat(Request::new(proto::HeartbeatRequest {
                worker_id: "w1".into(),
                active_tasks: 2,
                avg_latency_ms: 120,
                memory_usage_mb: 256,
            }))
            .await
            .unwrap();
        assert!(response.into_inner().ok);

        let record = registry.record("w1").unwrap();
        assert_eq!(record.active_tasks, 2);
        assert_eq!(record.avg_latency_ms, 120);
    }

    #[tokio::test]
    async fn test_rejection_stream_yields_single_nack() {
        let mut stream = WorkerStreamServer::rejection_stream("nope");
        let first = stream.next().await.unwrap().unwrap();
        match first.payload {
            Some(proto::server_message::Payload::RegisterAck(ack)) => {
                assert!(!ack.accepted);
                assert_eq!(ack.message, "nope");
            }
            other => panic!("unexpected payload {:?}", other),
        }
        assert!(stream.next().await.is_none());
    }
}
