//! # Dispatch Pool
//!
//! Front-end side of the cluster. Coordinators connect in and each connection
//! becomes a link (see [`link`](super::link)). [`DispatchPool::submit`] turns
//! the "one job per round trip per link" constraint into a plain async call
//! that any number of request handlers can make at once.
//!
//! ## Admission
//!
//! ```text
//! submit ─▶ free link? ──yes──▶ take it
//!              │no
//!              ▼
//!          admitted ≥ max_concurrent_callers? ──yes──▶ PoolSaturated
//!              │no
//!              ▼
//!          wait for a link (≤ admission_wait) ──expired──▶ Timeout
//! ```
//!
//! Link `busy` flags and the admitted-caller count live under one mutex;
//! callers waiting for a link are woken through a [`Notify`] whenever a link
//! is freed or attached. Each job gets its own `oneshot` completion signal,
//! so a reply can only wake the caller that sent it.
//!
//! A link that does not answer within `reply_timeout` is dropped from the
//! pool, which closes its connection.

use log::{debug, error, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, Mutex, Notify};

use super::link::{run_link, LinkId, LinkJob};
use super::stats::DispatchStats;
use crate::common::config::DispatchSettings;
use crate::common::connection::Connection;
use crate::common::messages::{Envelope, MAX_PAYLOAD_SIZE};
use crate::error::{ClusterError, Result};

struct LinkSlot {
    peer: String,
    jobs: mpsc::Sender<LinkJob>,
    busy: bool,
    /// Index given to the next job on this link
    next_index: u32,
    _shutdown: oneshot::Sender<()>,
}

#[derive(Default)]
struct PoolState {
    links: HashMap<LinkId, LinkSlot>,
    admitted: usize,
}

impl PoolState {
    /// Mark the lowest-numbered free link busy and hand out its next job index.
    fn claim_free(&mut self) -> Option<(LinkId, u32, mpsc::Sender<LinkJob>)> {
        let (&id, slot) = self
            .links
            .iter_mut()
            .filter(|(_, slot)| !slot.busy)
            .min_by_key(|(id, _)| **id)?;

        slot.busy = true;
        let index = slot.next_index;
        slot.next_index = slot.next_index.wrapping_add(1);
        Some((id, index, slot.jobs.clone()))
    }
}

pub struct DispatchPool {
    settings: DispatchSettings,
    state: Mutex<PoolState>,
    freed: Notify,
    next_id: AtomicU64,
    stats: DispatchStats,
}

impl DispatchPool {
    pub fn new(settings: DispatchSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(PoolState::default()),
            freed: Notify::new(),
            next_id: AtomicU64::new(0),
            stats: DispatchStats::new(),
        }
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    pub async fn link_count(&self) -> usize {
        self.state.lock().await.links.len()
    }

    pub async fn busy_count(&self) -> usize {
        self.state.lock().await.links.values().filter(|l| l.busy).count()
    }

    /// Accept coordinator connections forever, adding each as a link.
    pub async fn serve_coordinators(self: &Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((socket, addr)) => {
                    if let Err(e) = socket.set_nodelay(true) {
                        debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
                    }
                    self.attach(Connection::new(socket), addr.to_string()).await;
                }
                Err(e) => error!("❌ Accept error: {}", e),
            }
        }
    }

    /// Add a coordinator connection as a free link and start its task.
    pub async fn attach<S>(self: &Arc<Self>, conn: Connection<S>, peer: String) -> LinkId
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (jobs_tx, jobs_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let total = {
            let mut state = self.state.lock().await;
            state.links.insert(
                id,
                LinkSlot {
                    peer: peer.clone(),
                    jobs: jobs_tx,
                    busy: false,
                    next_index: 0,
                    _shutdown: shutdown_tx,
                },
            );
            state.links.len()
        };
        info!("🔗 Coordinator {} connected as link {} ({} links)", peer, id, total);
        self.freed.notify_waiters();

        let pool = self.clone();
        tokio::spawn(async move {
            run_link(id, conn, jobs_rx, shutdown_rx).await;
            pool.remove(id).await;
        });

        id
    }

    /// Compress `image` on whichever coordinator link frees up first.
    ///
    /// The job runs in its own task, so a caller that gives up early still
    /// leaves the link and its admission slot correctly released.
    ///
    /// # Errors
    /// - [`ClusterError::PoolSaturated`]: no free link and the admission ceiling is reached
    /// - [`ClusterError::Timeout`]: no link freed within `admission_wait`, or no reply within `reply_timeout`
    /// - [`ClusterError::JobFailed`]: the coordinator answered with a failure envelope
    /// - [`ClusterError::LinkClosed`]: the link went away while the job was in flight
    /// - [`ClusterError::FrameTooLarge`]: `image` exceeds [`MAX_PAYLOAD_SIZE`]; no link is claimed
    pub async fn submit(self: &Arc<Self>, image: Vec<u8>) -> Result<Vec<u8>> {
        let pool = self.clone();
        tokio::spawn(async move { pool.execute(image).await })
            .await
            .map_err(|e| ClusterError::JobFailed(format!("dispatch task panicked: {}", e)))?
    }

    async fn execute(&self, image: Vec<u8>) -> Result<Vec<u8>> {
        self.stats.increment_submitted();
        let started = Instant::now();

        let result = if image.len() > MAX_PAYLOAD_SIZE {
            Err(ClusterError::FrameTooLarge {
                size: image.len(),
                max: MAX_PAYLOAD_SIZE,
            })
        } else {
            self.dispatch(image).await
        };

        match &result {
            Ok(output) => {
                let elapsed = started.elapsed();
                info!("✅ Job completed in {:?} ({} bytes)", elapsed, output.len());
                self.stats.record_completed(elapsed.as_millis() as u64);
            }
            Err(ClusterError::PoolSaturated { admitted }) => {
                warn!("⚠️  Rejecting job: pool saturated ({} callers admitted)", admitted);
                self.stats.increment_rejected();
            }
            Err(ClusterError::Timeout(reason)) => {
                warn!("⏰ Job timed out: {}", reason);
                self.stats.increment_timed_out();
            }
            Err(e) => {
                error!("❌ Job failed: {}", e);
                self.stats.increment_failed();
            }
        }

        result
    }

    async fn dispatch(&self, image: Vec<u8>) -> Result<Vec<u8>> {
        let (link, index, jobs) = self.acquire().await?;
        let outcome = self.round_trip(link, index, jobs, image).await;
        let drop_link = matches!(
            outcome,
            Err(ClusterError::Timeout(_)) | Err(ClusterError::LinkClosed)
        );
        self.finish(link, drop_link).await;
        outcome
    }

    /// Claim a free link, waiting for one if the admission ceiling allows it.
    async fn acquire(&self) -> Result<(LinkId, u32, mpsc::Sender<LinkJob>)> {
        let deadline = tokio::time::Instant::now() + self.settings.admission_wait;
        let mut waiting = false;

        loop {
            // Register interest before inspecting state so a release between
            // the check and the await is not missed.
            let notified = self.freed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.state.lock().await;
                if let Some(claim) = state.claim_free() {
                    if !waiting {
                        state.admitted += 1;
                    }
                    return Ok(claim);
                }
                if !waiting {
                    if state.admitted >= self.settings.max_concurrent_callers {
                        return Err(ClusterError::PoolSaturated {
                            admitted: state.admitted,
                        });
                    }
                    state.admitted += 1;
                    waiting = true;
                    debug!("Caller queued for a link ({} admitted)", state.admitted);
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                let mut state = self.state.lock().await;
                state.admitted = state.admitted.saturating_sub(1);
                return Err(ClusterError::Timeout(format!(
                    "no coordinator link became free within {:?}",
                    self.settings.admission_wait
                )));
            }
        }
    }

    async fn round_trip(
        &self,
        link: LinkId,
        index: u32,
        jobs: mpsc::Sender<LinkJob>,
        image: Vec<u8>,
    ) -> Result<Vec<u8>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        debug!("📤 Job #{} sent on link {} ({} bytes)", index, link, image.len());
        jobs.send(LinkJob {
            envelope: Envelope::new(index, image),
            reply: reply_tx,
        })
        .await
        .map_err(|_| ClusterError::LinkClosed)?;

        let reply = match tokio::time::timeout(self.settings.reply_timeout, reply_rx).await {
            Err(_) => {
                return Err(ClusterError::Timeout(format!(
                    "link {} did not answer job #{} within {:?}",
                    link, index, self.settings.reply_timeout
                )))
            }
            Ok(Err(_)) => return Err(ClusterError::LinkClosed),
            Ok(Ok(reply)) => reply?,
        };

        match reply.error {
            Some(reason) => Err(ClusterError::JobFailed(reason)),
            None => Ok(reply.payload),
        }
    }

    /// Give the link back (or drop it) and free the caller's admission slot.
    async fn finish(&self, link: LinkId, drop_link: bool) {
        {
            let mut state = self.state.lock().await;
            state.admitted = state.admitted.saturating_sub(1);
            if drop_link {
                if let Some(slot) = state.links.remove(&link) {
                    warn!("🗑️  Dropped coordinator link {} ({})", link, slot.peer);
                }
            } else if let Some(slot) = state.links.get_mut(&link) {
                slot.busy = false;
            }
        }
        self.freed.notify_waiters();
    }

    async fn remove(&self, link: LinkId) {
        if let Some(slot) = self.state.lock().await.links.remove(&link) {
            info!("👋 Coordinator link {} ({}) removed", link, slot.peer);
        }
    }
}
