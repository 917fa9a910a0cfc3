//! # Coordinator Link
//!
//! One task per connected coordinator. The link carries at most one job at
//! a time: it writes the request envelope, then waits for the matching reply
//! and hands it to the caller through that job's own `oneshot` channel. No
//! other caller can observe the reply.
//!
//! ```text
//!   free ──job──▶ busy (awaiting reply) ──reply──▶ free
//! ```
//!
//! A job whose envelope cannot be framed (too large, or not serializable)
//! fails on its own without touching the socket. The task ends when the
//! coordinator disconnects, when a transport error occurs, or when the pool
//! drops the link's shutdown handle. A job still pending at that point is
//! failed with [`ClusterError::LinkClosed`].

use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};

use crate::common::connection::Connection;
use crate::common::messages::Envelope;
use crate::error::{ClusterError, Result};

pub type LinkId = u64;

/// A request handed to a link together with its private completion signal.
pub struct LinkJob {
    pub envelope: Envelope,
    pub reply: oneshot::Sender<Result<Envelope>>,
}

/// Drive one coordinator connection until it closes or `shutdown` fires.
pub async fn run_link<S>(
    id: LinkId,
    conn: Connection<S>,
    mut jobs: mpsc::Receiver<LinkJob>,
    mut shutdown: oneshot::Receiver<()>,
) where
    S: AsyncRead + AsyncWrite,
{
    let (mut reader, mut writer) = conn.into_split();
    let mut pending: Option<(u32, oneshot::Sender<Result<Envelope>>)> = None;

    loop {
        tokio::select! {
            job = jobs.recv(), if pending.is_none() => match job {
                Some(LinkJob { envelope, reply }) => {
                    let index = envelope.index;
                    match writer.write_message(&envelope).await {
                        Ok(()) => {}
                        // Rejected before any byte reached the socket; the link stays usable.
                        Err(e @ (ClusterError::FrameTooLarge { .. } | ClusterError::Encoding(_))) => {
                            warn!("⚠️  Link {} refused job #{}: {}", id, index, e);
                            let _ = reply.send(Err(e));
                            continue;
                        }
                        Err(e) => {
                            warn!("⚠️  Link {} failed to send job #{}: {}", id, index, e);
                            let _ = reply.send(Err(e));
                            break;
                        }
                    }
                    debug!("📤 Link {} sent job #{}", id, index);
                    pending = Some((index, reply));
                }
                None => break,
            },
            message = reader.read_message() => match message {
                Ok(Some(envelope)) => match pending.take() {
                    Some((index, reply)) => {
                        if envelope.index != index {
                            warn!(
                                "⚠️  Link {} answered job #{} with index #{}",
                                id, index, envelope.index
                            );
                        }
                        let _ = reply.send(Ok(envelope));
                    }
                    None => warn!(
                        "⚠️  Link {} sent unsolicited envelope #{}",
                        id, envelope.index
                    ),
                },
                Ok(None) => {
                    info!("🔌 Coordinator link {} closed", id);
                    break;
                }
                Err(e) => {
                    warn!("⚠️  Coordinator link {} failed: {}", id, e);
                    break;
                }
            },
            _ = &mut shutdown => {
                debug!("Link {} shut down", id);
                break;
            }
        }
    }

    if let Some((_, reply)) = pending {
        let _ = reply.send(Err(ClusterError::LinkClosed));
    }
}
