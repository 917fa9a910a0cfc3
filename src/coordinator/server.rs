//! # Coordinator
//!
//! The cluster server. It sits between the front end and the workers:
//!
//! ```text
//!   front end ◀──── one upstream link ──── Coordinator ◀──── worker links ──── workers
//! ```
//!
//! The coordinator dials the front end (retrying until it is reachable) and
//! accepts worker connections on its own listener. Jobs arriving on the
//! upstream link are served one after another; each job is split into
//! strips across the workers that are free at that moment.
//!
//! ## Job lifecycle
//!
//! 1. Reserve every free worker ([`WorkerPool::reserve_free`])
//! 2. Split the image into `min(workers, height)` strips and send strip `i`
//!    to the `i`-th reserved worker
//! 3. Collect replies in any order until every strip is back. The job fails
//!    when a dispatch fails, when an assigned worker disconnects, or when the
//!    job timeout fires; on failure every worker still holding a strip is
//!    evicted so its late reply cannot reach a later job
//! 4. Stitch the strips in index order and release the workers
//!
//! Every upstream request is answered with an envelope carrying the same
//! index, either the stitched image or a failure reason.

use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use super::job::{Accepted, Job};
use super::pool::{WorkerEvent, WorkerId, WorkerPool};
use super::split;
use crate::common::config::CoordinatorConfig;
use crate::common::connection::Connection;
use crate::common::messages::Envelope;
use crate::error::{ClusterError, Result};

pub struct Coordinator {
    config: CoordinatorConfig,
    pool: Arc<WorkerPool>,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig) -> Self {
        Self {
            config,
            pool: Arc::new(WorkerPool::new()),
        }
    }

    pub fn pool(&self) -> Arc<WorkerPool> {
        self.pool.clone()
    }

    /// Bind the worker listener and run until one of the long-running tasks stops.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.worker_listen_address).await?;
        info!(
            "📡 Coordinator listening for workers on {}",
            self.config.worker_listen_address
        );

        self.serve(listener).await;
        Ok(())
    }

    /// Accept workers on `listener` while keeping the upstream link alive.
    pub async fn serve(&self, listener: TcpListener) {
        tokio::select! {
            _ = self.serve_workers(listener) => error!("❌ Worker listener terminated"),
            _ = self.run_upstream() => error!("❌ Upstream task terminated"),
        }
    }

    /// Accept worker connections forever, registering each with the pool.
    pub async fn serve_workers(&self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((socket, addr)) => {
                    if let Err(e) = socket.set_nodelay(true) {
                        debug!("Could not set TCP_NODELAY for {}: {}", addr, e);
                    }
                    self.pool.attach(Connection::new(socket), addr.to_string()).await;
                }
                Err(e) => error!("❌ Accept error: {}", e),
            }
        }
    }

    /// Keep a link to the front end open, reconnecting whenever it drops.
    async fn run_upstream(&self) {
        loop {
            let stream = self.connect_upstream().await;
            info!("🤝 Coordinator connected to front end at {}", self.config.upstream_address);

            match self.serve_upstream(Connection::new(stream)).await {
                Ok(()) => warn!("⚠️  Front end closed the connection"),
                Err(e) => error!("❌ Front-end link failed: {}", e),
            }

            tokio::time::sleep(self.config.reconnect_delay()).await;
        }
    }

    async fn connect_upstream(&self) -> TcpStream {
        loop {
            match TcpStream::connect(&self.config.upstream_address).await {
                Ok(stream) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("Could not set TCP_NODELAY: {}", e);
                    }
                    return stream;
                }
                Err(e) => {
                    debug!("Front end {} not reachable yet: {}", self.config.upstream_address, e);
                    tokio::time::sleep(self.config.reconnect_delay()).await;
                }
            }
        }
    }

    /// Answer job requests on an established upstream link until it closes.
    pub async fn serve_upstream<S>(&self, mut conn: Connection<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        while let Some(request) = conn.read_message().await? {
            let index = request.index;
            info!(
                "📥 Coordinator received job #{} ({} bytes)",
                index,
                request.payload.len()
            );

            let reply = match self.run_job(request.payload).await {
                Ok(image) => Envelope::new(index, image),
                Err(e) => {
                    error!("❌ Job #{} failed: {}", index, e);
                    Envelope::failure(index, e.to_string())
                }
            };
            conn.write_message(&reply).await?;
        }

        Ok(())
    }

    /// Compress one whole image across the currently free workers.
    pub async fn run_job(&self, image: Vec<u8>) -> Result<Vec<u8>> {
        let workers = self.pool.reserve_free().await;
        if workers.is_empty() {
            return Err(ClusterError::NoWorkers);
        }

        let result = self.distribute(&workers, image).await;
        self.pool.release(&workers).await;
        result
    }

    async fn distribute(&self, workers: &[WorkerId], image: Vec<u8>) -> Result<Vec<u8>> {
        let mut job = Job::new();
        let started = Instant::now();
        let count = workers.len();

        let strips = tokio::task::spawn_blocking(move || split::split(&image, count))
            .await
            .map_err(|e| ClusterError::Codec(format!("split task panicked: {}", e)))??;
        info!(
            "🧩 Job {} split into {} strip(s) for {} free worker(s)",
            job.id(),
            strips.len(),
            count
        );

        if let Err(e) = self.collect(&mut job, strips, workers).await {
            let holding = job.outstanding_workers();
            if !holding.is_empty() {
                self.pool.evict(&holding).await;
            }
            return Err(e);
        }

        let id = job.id();
        let results = job.into_results();
        let output = self.config.output;
        let stitched = tokio::task::spawn_blocking(move || split::stitch(results, output))
            .await
            .map_err(|e| ClusterError::Codec(format!("stitch task panicked: {}", e)))??;

        info!(
            "✅ Job {} finished in {:?} ({} bytes)",
            id,
            started.elapsed(),
            stitched.len()
        );
        Ok(stitched)
    }

    /// Send strip `i` to `workers[i]` and wait until every strip is back.
    async fn collect(&self, job: &mut Job, strips: Vec<Envelope>, workers: &[WorkerId]) -> Result<()> {
        let (reply_tx, mut reply_rx) = mpsc::channel(strips.len());
        for (strip, &worker) in strips.into_iter().zip(workers) {
            job.assign(strip.index, worker);
            self.pool.dispatch(worker, strip, reply_tx.clone()).await?;
        }
        drop(reply_tx);

        let deadline = tokio::time::sleep(self.config.job_timeout());
        tokio::pin!(deadline);

        while !job.is_complete() {
            tokio::select! {
                event = reply_rx.recv() => match event {
                    Some((worker, WorkerEvent::Reply(envelope))) => {
                        let index = envelope.index;
                        match job.accept(worker, envelope) {
                            Accepted::Stored => debug!(
                                "Job {} got strip #{} from worker {} ({}/{})",
                                job.id(), index, worker, job.received_count(), job.expected_count()
                            ),
                            Accepted::Duplicate => warn!(
                                "⚠️  Job {} ignoring duplicate strip #{} from worker {}",
                                job.id(), index, worker
                            ),
                            Accepted::Unexpected => warn!(
                                "⚠️  Job {} ignoring unexpected strip #{} from worker {}",
                                job.id(), index, worker
                            ),
                        }
                    }
                    Some((worker, WorkerEvent::Gone)) => {
                        if job.awaits(worker) {
                            warn!("⚠️  Job {} lost worker {} before its strip came back", job.id(), worker);
                            return Err(ClusterError::LinkClosed);
                        }
                        debug!("Job {} saw finished worker {} leave", job.id(), worker);
                    }
                    None => return Err(ClusterError::LinkClosed),
                },
                _ = &mut deadline => {
                    return Err(ClusterError::Timeout(format!(
                        "job {} got {} of {} strips within {:?}",
                        job.id(),
                        job.received_count(),
                        job.expected_count(),
                        self.config.job_timeout()
                    )));
                }
            }
        }
        Ok(())
    }
}
