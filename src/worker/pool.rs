//! In-memory pool of connected workers.
//!
//! The pool uniquely owns the connected-worker set, and each worker's send
//! side is a single queue handle, so writes to one stream are serialized by
//! construction. Selection is least-loaded by `active_tasks / max_concurrent`
//! with saturated workers skipped; there is no queueing here: when nothing
//! has capacity the dispatcher naks and the bus holds the backlog.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;

use super::proto;
use crate::error::{AioxError, Result};

/// Advertised capacity used when a worker registers with none.
pub const DEFAULT_MAX_CONCURRENT: i32 = 4;

/// One worker attached via a live bidirectional stream.
pub struct ConnectedWorker {
    worker_id: String,
    max_concurrent: i32,
    supported_providers: Vec<String>,
    active_tasks: AtomicI32,
    sender: mpsc::Sender<proto::ServerMessage>,
}

impl ConnectedWorker {
    pub fn new(
        worker_id: &str,
        max_concurrent: i32,
        supported_providers: Vec<String>,
        sender: mpsc::Sender<proto::ServerMessage>,
    ) -> Self {
        Self {
            worker_id: worker_id.to_string(),
            max_concurrent,
            supported_providers,
            active_tasks: AtomicI32::new(0),
            sender,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn max_concurrent(&self) -> i32 {
        self.max_concurrent
    }

    pub fn supported_providers(&self) -> &[String] {
        &self.supported_providers
    }

    pub fn active_tasks(&self) -> i32 {
        self.active_tasks.load(Ordering::SeqCst)
    }

    pub fn increment_active(&self) {
        self.active_tasks.fetch_add(1, Ordering::SeqCst);
    }

    /// Decrement, never below zero.
    pub fn decrement_active(&self) {
        let _ = self
            .active_tasks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                if v > 0 {
                    Some(v - 1)
                } else {
                    None
                }
            });
    }

    /// Load ratio for selection. A worker with no advertised capacity reads
    /// as fully loaded.
    pub fn load_fraction(&self) -> f64 {
        if self.max_concurrent <= 0 {
            return 1.0;
        }
        f64::from(self.active_tasks()) / f64::from(self.max_concurrent)
    }

    /// Queue a message onto this worker's stream.
    pub async fn send(&self, msg: proto::ServerMessage) -> Result<()> {
        self.sender
            .send(msg)
            .await
            .map_err(|_| AioxError::Worker(format!("worker {} stream closed", self.worker_id)))
    }
}

/// The set of currently connected workers.
#[derive(Default)]
pub struct WorkerPool {
    workers: RwLock<HashMap<String, Arc<ConnectedWorker>>>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a worker. Returns false when the id is already connected; the
    /// pool is left unchanged in that case.
    pub fn register(&self, worker: Arc<ConnectedWorker>) -> bool {
        let mut workers = self.workers.write().unwrap();
        if workers.contains_key(worker.worker_id()) {
            return false;
        }
        workers.insert(worker.worker_id().to_string(), worker);
        true
    }

    pub fn unregister(&self, worker_id: &str) {
        self.workers.write().unwrap().remove(worker_id);
    }

    pub fn get(&self, worker_id: &str) -> Option<Arc<ConnectedWorker>> {
        self.workers.read().unwrap().get(worker_id).cloned()
    }

    /// The least-loaded worker with spare capacity, if any.
    pub fn select_worker(&self) -> Option<Arc<ConnectedWorker>> {
        let workers = self.workers.read().unwrap();
        let mut best: Option<(f64, &Arc<ConnectedWorker>)> = None;
        for worker in workers.values() {
            let load = worker.load_fraction();
            if load >= 1.0 {
                continue;
            }
            match best {
                Some((best_load, _)) if load >= best_load => {}
                _ => best = Some((load, worker)),
            }
        }
        best.map(|(_, worker)| Arc::clone(worker))
    }

    pub fn connected_count(&self) -> usize {
        self.workers.read().unwrap().len()
    }

    /// Sum of in-flight tasks across the pool.
    pub fn total_active(&self) -> i32 {
        self.workers
            .read()
            .unwrap()
            .values()
            .map(|w| w.active_tasks())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(id: &str, max: i32) -> Arc<ConnectedWorker> {
        let (tx, _rx) = mpsc::channel(8);
        Arc::new(ConnectedWorker::new(id, max, vec!["openai".into()], tx))
    }

    #[test]
    fn test_register_and_duplicate_rejected() {
        let pool = WorkerPool::new();
        assert!(pool.register(worker("w1", 4)));
        assert_eq!(pool.connected_count(), 1);

        assert!(!pool.register(worker("w1", 8)));
        assert_eq!(pool.connected_count(), 1);
        // The original registration survives.
        assert_eq!(pool.get("w1").unwrap().max_concurrent(), 4);
    }

    #[test]
    fn test_unregister() {
        let pool = WorkerPool::new();
        pool.register(worker("w1", 4));
        pool.unregister("w1");
        assert_eq!(pool.connected_count(), 0);
        assert!(pool.get("w1").is_none());
    }

    #[test]
    fn test_select_least_loaded() {
        let pool = WorkerPool::new();
        let busy = worker("busy", 4);
        busy.increment_active();
        busy.increment_active();
        let idle = worker("idle", 4);
        pool.register(busy);
        pool.register(idle);

        let selected = pool.select_worker().unwrap();
        assert_eq!(selected.worker_id(), "idle");
    }

    #[test]
    fn test_select_skips_saturated() {
        let pool = WorkerPool::new();
        let full = worker("full", 2);
        full.increment_active();
        full.increment_active();
        pool.register(full);
        assert!(pool.select_worker().is_none());
    }

    #[test]
    fn test_select_empty_pool() {
        assert!(WorkerPool::new().select_worker().is_none());
    }

    #[test]
    fn test_zero_capacity_reads_fully_loaded() {
        let pool = WorkerPool::new();
        pool.register(worker("zero", 0));
        assert!(pool.select_worker().is_none());
        assert_eq!(pool.get("zero").unwrap().load_fraction(), 1.0);
    }

    #[test]
    fn test_active_counter_floors_at_zero() {
        let w = worker("w", 4);
        w.decrement_active();
        assert_eq!(w.active_tasks(), 0);
        w.increment_active();
        w.increment_active();
        w.decrement_active();
        assert_eq!(w.active_tasks(), 1);
    }

    #[test]
    fn test_active_never_exceeds_capacity_under_selection() {
        let pool = WorkerPool::new();
        pool.register(worker("w", 3));
        // Simulate dispatches: select, then increment, as the dispatcher does.
        for _ in 0..3 {
            let selected = pool.select_worker().expect("capacity remains");
            selected.increment_active();
        }
        assert!(pool.select_worker().is_none());
        let w = pool.get("w").unwrap();
        assert_eq!(w.active_tasks(), 3);
        assert!(w.active_tasks() <= w.max_concurrent());
    }

    #[test]
    fn test_total_active() {
        let pool = WorkerPool::new();
        let a = worker("a", 4);
        let b = worker("b", 4);
        a.increment_active();
        b.increment_active();
        b.increment_active();
        pool.register(a);
        pool.register(b);
        assert_eq!(pool.total_active(), 3);
    }

    #[tokio::test]
    async fn test_send_reaches_stream_queue() {
        let (tx, mut rx) = mpsc::channel(8);
        let w = ConnectedWorker::new("w", 4, vec![], tx);
        w.send(proto::ServerMessage { payload: None }).await.unwrap();
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_send_after_stream_close_errors() {
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        let w = ConnectedWorker::new("w", 4, vec![], tx);
        assert!(w.send(proto::ServerMessage { payload: None }).await.is_err());
    }
}
