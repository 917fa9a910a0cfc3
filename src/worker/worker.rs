//! # Worker Node
//!
//! A worker owns one persistent connection to the coordinator. It pulls an
//! [`Envelope`] carrying one image strip, runs the block codec on it and pushes
//! the result back under the **same index**. Strips are handled one at a time,
//! in arrival order, for the lifetime of the connection.
//!
//! A strip that fails to decode is logged and gets no reply; the coordinator's
//! job timeout covers the missing strip.

use log::{debug, error, info, warn};
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::common::config::{ContainerFormat, WorkerConfig};
use crate::common::connection::Connection;
use crate::common::messages::Envelope;
use crate::error::{ClusterError, Result};
use crate::processing::codec;

/// Stateless strip compressor.
#[derive(Debug, Clone, Copy)]
pub struct WorkerCore {
    output: ContainerFormat,
}

impl WorkerCore {
    pub fn new(output: ContainerFormat) -> Self {
        Self { output }
    }

    /// Compress the strip in `envelope` and wrap the result under the same index.
    ///
    /// The codec is CPU bound, so it runs on the blocking pool rather than on
    /// an async worker thread.
    pub async fn process(&self, envelope: Envelope) -> Result<Envelope> {
        let index = envelope.index;
        let output = self.output;

        let compressed = tokio::task::spawn_blocking(move || {
            codec::compress_with(&envelope.payload, output)
        })
        .await
        .map_err(|e| ClusterError::Codec(format!("compression task panicked: {}", e)))??;

        Ok(Envelope::new(index, compressed))
    }
}

pub struct WorkerNode {
    config: WorkerConfig,
    core: WorkerCore,
}

impl WorkerNode {
    pub fn new(config: WorkerConfig) -> Self {
        let core = WorkerCore::new(config.output);
        Self { config, core }
    }

    /// Connect to the coordinator and serve strips forever, reconnecting
    /// whenever the connection drops.
    pub async fn run(&self) {
        loop {
            let stream = self.connect().await;
            info!(
                "🤝 Worker connected to coordinator at {}",
                self.config.coordinator_address
            );

            match self.serve(Connection::new(stream)).await {
                Ok(()) => warn!("⚠️  Coordinator closed the connection"),
                Err(e) => error!("❌ Coordinator link failed: {}", e),
            }

            tokio::time::sleep(self.config.reconnect_delay()).await;
        }
    }

    async fn connect(&self) -> TcpStream {
        loop {
            match TcpStream::connect(&self.config.coordinator_address).await {
                Ok(stream) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        debug!("Could not set TCP_NODELAY: {}", e);
                    }
                    return stream;
                }
                Err(e) => {
                    debug!(
                        "Coordinator {} not reachable yet: {}",
                        self.config.coordinator_address, e
                    );
                    tokio::time::sleep(self.config.reconnect_delay()).await;
                }
            }
        }
    }

    /// Serve strips on an established connection until the peer closes it.
    ///
    /// Returns `Err` only for transport failures; codec failures are logged
    /// and the loop moves on to the next strip.
    pub async fn serve<S>(&self, mut conn: Connection<S>) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        while let Some(envelope) = conn.read_message().await? {
            let index = envelope.index;
            info!(
                "📥 Worker received strip #{} ({} bytes)",
                index,
                envelope.payload.len()
            );

            let started = Instant::now();
            match self.core.process(envelope).await {
                Ok(reply) => {
                    info!(
                        "✅ Worker compressed strip #{} in {:?} ({} bytes)",
                        index,
                        started.elapsed(),
                        reply.payload.len()
                    );
                    conn.write_message(&reply).await?;
                }
                Err(e) => {
                    error!("❌ Worker failed to compress strip #{}: {}", index, e);
                }
            }
        }

        Ok(())
    }
}
