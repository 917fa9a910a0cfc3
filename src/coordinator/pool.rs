//! # Worker Pool
//!
//! Registry of connected workers, keyed by [`WorkerId`]. A worker is added
//! when it connects and removed when its connection closes, when a write to
//! it fails, or when the coordinator evicts it after a job timeout.
//!
//! ## Per-worker link
//!
//! Each attached connection is split into two tasks:
//!
//! ```text
//!   dispatch() ──mpsc──▶ writer task ──frames──▶ worker
//!   job collector ◀──mpsc── reader task ◀──frames── worker
//! ```
//!
//! The reader forwards every reply to whichever job registered itself in the
//! worker's reply slot at dispatch time; the slot stays set until the job
//! releases the worker, so a stray envelope cannot displace the real reply.
//! A reply that arrives while no job is registered is logged and discarded.
//! When the link ends for any reason the registered job is told
//! [`WorkerEvent::Gone`].
//!
//! ## Busy flag
//!
//! A worker is `busy` from [`WorkerPool::reserve_free`] until
//! [`WorkerPool::release`]; only free workers can be reserved, so no worker
//! ever carries strips of two jobs at once.

use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, Mutex};

use crate::common::connection::Connection;
use crate::common::messages::Envelope;
use crate::error::{ClusterError, Result};

pub type WorkerId = u64;

/// What a worker's link reports to the job it is serving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerEvent {
    Reply(Envelope),
    /// The worker left the pool and will not answer.
    Gone,
}

/// Where a worker's events are delivered, tagged with the worker id.
pub type ReplySender = mpsc::Sender<(WorkerId, WorkerEvent)>;

type ReplySlot = Arc<Mutex<Option<ReplySender>>>;

struct WorkerHandle {
    peer: String,
    outbound: mpsc::Sender<Envelope>,
    reply_slot: ReplySlot,
    busy: bool,
    /// Dropping the handle drops this sender, which stops the reader task.
    _shutdown: oneshot::Sender<()>,
}

#[derive(Default)]
pub struct WorkerPool {
    workers: Mutex<HashMap<WorkerId, WorkerHandle>>,
    next_id: AtomicU64,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly connected worker and start its link tasks.
    pub async fn attach<S>(self: &Arc<Self>, conn: Connection<S>, peer: String) -> WorkerId
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reader, writer) = conn.into_split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Envelope>(1);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let reply_slot: ReplySlot = Arc::new(Mutex::new(None));

        let handle = WorkerHandle {
            peer: peer.clone(),
            outbound: outbound_tx,
            reply_slot: reply_slot.clone(),
            busy: false,
            _shutdown: shutdown_tx,
        };
        let total = {
            let mut workers = self.workers.lock().await;
            workers.insert(id, handle);
            workers.len()
        };
        info!("🔗 Worker {} joined from {} ({} connected)", id, peer, total);

        let pool = self.clone();
        let mut writer = writer;
        tokio::spawn(async move {
            while let Some(envelope) = outbound_rx.recv().await {
                if let Err(e) = writer.write_message(&envelope).await {
                    error!("❌ Failed to send strip #{} to worker {}: {}", envelope.index, id, e);
                    pool.remove(id).await;
                    break;
                }
                debug!("📤 Sent strip #{} to worker {}", envelope.index, id);
            }
        });

        let pool = self.clone();
        let mut reader = reader;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    message = reader.read_message() => match message {
                        Ok(Some(envelope)) => {
                            let target = reply_slot.lock().await.clone();
                            match target {
                                Some(tx) => {
                                    let _ = tx.send((id, WorkerEvent::Reply(envelope))).await;
                                }
                                None => warn!(
                                    "⚠️  Discarding unsolicited strip #{} from worker {}",
                                    envelope.index, id
                                ),
                            }
                        }
                        Ok(None) => {
                            info!("🔌 Worker {} disconnected", id);
                            break;
                        }
                        Err(e) => {
                            warn!("⚠️  Worker {} link failed: {}", id, e);
                            break;
                        }
                    },
                    _ = &mut shutdown_rx => {
                        debug!("Worker {} link shut down", id);
                        break;
                    }
                }
            }
            pool.remove(id).await;

            let target = reply_slot.lock().await.take();
            if let Some(tx) = target {
                let _ = tx.send((id, WorkerEvent::Gone)).await;
            }
        });

        id
    }

    pub async fn len(&self) -> usize {
        self.workers.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.workers.lock().await.is_empty()
    }

    pub async fn busy_count(&self) -> usize {
        self.workers.lock().await.values().filter(|w| w.busy).count()
    }

    /// Mark every free worker busy and return their ids in ascending order.
    pub async fn reserve_free(&self) -> Vec<WorkerId> {
        let mut workers = self.workers.lock().await;
        let mut reserved: Vec<WorkerId> = workers
            .iter_mut()
            .filter(|(_, handle)| !handle.busy)
            .map(|(id, handle)| {
                handle.busy = true;
                *id
            })
            .collect();
        reserved.sort_unstable();
        reserved
    }

    /// Mark workers free again; ids that are no longer registered are skipped.
    pub async fn release(&self, ids: &[WorkerId]) {
        let mut workers = self.workers.lock().await;
        for id in ids {
            if let Some(handle) = workers.get_mut(id) {
                handle.busy = false;
                handle.reply_slot.lock().await.take();
            }
        }
    }

    /// Send a strip to a reserved worker; its replies are delivered to
    /// `reply_to` until the worker is released.
    pub async fn dispatch(&self, id: WorkerId, envelope: Envelope, reply_to: ReplySender) -> Result<()> {
        let outbound = {
            let workers = self.workers.lock().await;
            let handle = workers.get(&id).ok_or(ClusterError::LinkClosed)?;
            *handle.reply_slot.lock().await = Some(reply_to);
            handle.outbound.clone()
        };

        outbound
            .send(envelope)
            .await
            .map_err(|_| ClusterError::LinkClosed)
    }

    /// Drop workers that still hold an unfinished strip; their connections are closed.
    pub async fn evict(&self, ids: &[WorkerId]) {
        let mut workers = self.workers.lock().await;
        for id in ids {
            if let Some(handle) = workers.remove(id) {
                warn!("🗑️  Evicted worker {} ({}) with an unfinished strip", id, handle.peer);
            }
        }
    }

    /// Forget a worker. Returns `false` if it was already gone.
    pub async fn remove(&self, id: WorkerId) -> bool {
        let removed = self.workers.lock().await.remove(&id);
        if let Some(handle) = &removed {
            info!("👋 Worker {} ({}) removed from pool", id, handle.peer);
        }
        removed.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::duplex;

    async fn wait_for_len(pool: &WorkerPool, expected: usize) {
        for _ in 0..100 {
            if pool.len().await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("pool never reached {} workers", expected);
    }

    #[tokio::test]
    async fn test_reserve_marks_busy_and_release_frees() {
        let pool = Arc::new(WorkerPool::new());
        let (_w1, c1) = duplex(1024);
        let (_w2, c2) = duplex(1024);
        pool.attach(Connection::new(c1), "w1".into()).await;
        pool.attach(Connection::new(c2), "w2".into()).await;

        let reserved = pool.reserve_free().await;
        assert_eq!(reserved.len(), 2);
        assert_eq!(pool.busy_count().await, 2);
        assert!(pool.reserve_free().await.is_empty());

        pool.release(&reserved).await;
        assert_eq!(pool.busy_count().await, 0);
    }

    #[tokio::test]
    async fn test_dispatch_routes_reply_to_caller() {
        let pool = Arc::new(WorkerPool::new());
        let (worker_side, coordinator_side) = duplex(1024);
        let id = pool.attach(Connection::new(coordinator_side), "w".into()).await;

        let (tx, mut rx) = mpsc::channel(1);
        pool.dispatch(id, Envelope::new(5, vec![1, 2, 3]), tx).await.unwrap();

        let mut worker = Connection::new(worker_side);
        let strip = worker.read_message().await.unwrap().unwrap();
        assert_eq!(strip.index, 5);
        worker.write_message(&Envelope::new(5, vec![9])).await.unwrap();

        let (from, event) = rx.recv().await.unwrap();
        assert_eq!(from, id);
        assert_eq!(event, WorkerEvent::Reply(Envelope::new(5, vec![9])));
    }

    #[tokio::test]
    async fn test_every_reply_reaches_the_job_until_release() {
        let pool = Arc::new(WorkerPool::new());
        let (worker_side, coordinator_side) = duplex(1024);
        let id = pool.attach(Connection::new(coordinator_side), "w".into()).await;

        let (tx, mut rx) = mpsc::channel(4);
        pool.dispatch(id, Envelope::new(0, vec![]), tx).await.unwrap();

        let mut worker = Connection::new(worker_side);
        worker.read_message().await.unwrap();
        worker.write_message(&Envelope::new(42, vec![])).await.unwrap();
        worker.write_message(&Envelope::new(0, vec![1])).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().1, WorkerEvent::Reply(Envelope::new(42, vec![])));
        assert_eq!(rx.recv().await.unwrap().1, WorkerEvent::Reply(Envelope::new(0, vec![1])));

        // After release the job no longer hears from the worker.
        pool.release(&[id]).await;
        worker.write_message(&Envelope::new(0, vec![2])).await.unwrap();
        let late = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(matches!(late, Err(_) | Ok(None)));
    }

    #[tokio::test]
    async fn test_disconnect_notifies_waiting_job() {
        let pool = Arc::new(WorkerPool::new());
        let (worker_side, coordinator_side) = duplex(1024);
        let id = pool.attach(Connection::new(coordinator_side), "w".into()).await;

        let (tx, mut rx) = mpsc::channel(2);
        pool.dispatch(id, Envelope::new(3, vec![]), tx).await.unwrap();
        let mut worker = Connection::new(worker_side);
        worker.read_message().await.unwrap();
        drop(worker);

        assert_eq!(rx.recv().await.unwrap(), (id, WorkerEvent::Gone));
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn test_disconnect_removes_worker() {
        let pool = Arc::new(WorkerPool::new());
        let (worker_side, coordinator_side) = duplex(1024);
        pool.attach(Connection::new(coordinator_side), "w".into()).await;
        assert_eq!(pool.len().await, 1);

        drop(worker_side);
        wait_for_len(&pool, 0).await;
    }

    #[tokio::test]
    async fn test_evict_closes_connection() {
        let pool = Arc::new(WorkerPool::new());
        let (worker_side, coordinator_side) = duplex(1024);
        let id = pool.attach(Connection::new(coordinator_side), "w".into()).await;

        pool.evict(&[id]).await;
        assert!(pool.is_empty().await);

        // Both link tasks exit, so the worker observes end-of-stream.
        let mut worker = Connection::new(worker_side);
        let closed = tokio::time::timeout(Duration::from_secs(2), worker.read_message())
            .await
            .unwrap();
        assert!(closed.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_dispatch_to_unknown_worker_fails() {
        let pool = Arc::new(WorkerPool::new());
        let (tx, _rx) = mpsc::channel(1);
        assert!(matches!(
            pool.dispatch(42, Envelope::new(0, vec![]), tx).await,
            Err(ClusterError::LinkClosed)
        ));
    }
}
