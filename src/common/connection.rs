//! # Frame Transport
//!
//! Wraps a byte stream with the length-prefixed framing used on every hop of
//! the cluster.
//!
//! ## Wire Protocol
//!
//! Each frame is a 4-byte length prefix (big-endian `u32`) followed by that
//! many bytes of payload. Envelope frames carry a JSON-encoded [`Envelope`]:
//! ```text
//! [4 bytes: payload length] [N bytes: payload]
//! ```
//!
//! A read that hits end-of-stream before the first header byte is a clean
//! close. A read that hits end-of-stream anywhere inside a frame is an
//! incomplete frame: it is logged and never handed to a consumer.

use log::{error, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;

use super::messages::Envelope;
use crate::error::{ClusterError, Result};

/// Maximum allowed frame size (100MB) to prevent memory exhaustion.
pub const MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// Size of the length prefix in bytes.
pub const HEADER_LEN: usize = 4;

/// Framed connection over any async byte stream.
///
/// Reading needs `S: AsyncRead`, writing needs `S: AsyncWrite`, so the halves
/// produced by [`Connection::into_split`] are themselves connections.
pub struct Connection<S = TcpStream> {
    stream: S,
}

impl<S> Connection<S> {
    /// Create a new Connection from an established stream.
    ///
    /// # Example
    /// ```ignore
    /// let stream = TcpStream::connect("127.0.0.1:7001").await?;
    /// let mut conn = Connection::new(stream);
    /// ```
    pub fn new(stream: S) -> Self {
        Self { stream }
    }
}

impl<S: AsyncRead + AsyncWrite> Connection<S> {
    /// Split into independently owned read and write halves.
    ///
    /// A link task reads replies on one half while another task writes
    /// requests on the other, without ever cancelling a half-read frame.
    pub fn into_split(self) -> (Connection<ReadHalf<S>>, Connection<WriteHalf<S>>) {
        let (read, write) = tokio::io::split(self.stream);
        (Connection::new(read), Connection::new(write))
    }
}

impl<S: AsyncRead + Unpin> Connection<S> {
    /// Read one raw frame.
    ///
    /// # Returns
    /// - `Ok(Some(bytes))`: a complete payload
    /// - `Ok(None)`: the peer closed the connection between frames
    /// - `Err(Incomplete)`: the peer closed mid-frame; the partial data is dropped
    /// - `Err(FrameTooLarge)`: declared size exceeds [`MAX_FRAME_SIZE`]
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let mut header = [0u8; HEADER_LEN];
        let received = self.read_full(&mut header).await?;
        if received == 0 {
            return Ok(None);
        }
        if received < HEADER_LEN {
            warn!(
                "⚠️  Connection closed inside frame header ({} of {} bytes)",
                received, HEADER_LEN
            );
            return Err(ClusterError::Incomplete {
                expected: HEADER_LEN,
                received,
            });
        }

        let length = u32::from_be_bytes(header) as usize;
        if length > MAX_FRAME_SIZE {
            error!(
                "❌ Frame too large: {} bytes (max: {} bytes)",
                length, MAX_FRAME_SIZE
            );
            return Err(ClusterError::FrameTooLarge {
                size: length,
                max: MAX_FRAME_SIZE,
            });
        }

        let mut data = vec![0u8; length];
        let received = self.read_full(&mut data).await?;
        if received < length {
            warn!(
                "⚠️  Dropping incomplete frame: expected {} bytes, received {}",
                length, received
            );
            return Err(ClusterError::Incomplete {
                expected: length,
                received,
            });
        }

        Ok(Some(data))
    }

    /// Read the next envelope.
    ///
    /// Frames that do not decode as an [`Envelope`] are logged and skipped;
    /// framing stays intact so the next frame is still readable.
    pub async fn read_message(&mut self) -> Result<Option<Envelope>> {
        loop {
            let Some(data) = self.read_frame().await? else {
                return Ok(None);
            };

            match Envelope::from_bytes(&data) {
                Ok(envelope) => return Ok(Some(envelope)),
                Err(e) => error!("❌ Failed to deserialize envelope: {}", e),
            }
        }
    }

    /// Fill `buf` unless the stream ends first; returns the number of bytes read.
    async fn read_full(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.stream.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }
}

impl<S: AsyncWrite + Unpin> Connection<S> {
    /// Write one raw frame: length prefix, payload, flush.
    pub async fn write_frame(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > MAX_FRAME_SIZE {
            return Err(ClusterError::FrameTooLarge {
                size: data.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        let length = data.len() as u32;
        self.stream.write_all(&length.to_be_bytes()).await?;
        self.stream.write_all(data).await?;
        self.stream.flush().await?;

        Ok(())
    }

    /// Serialize and send an envelope.
    pub async fn write_message(&mut self, envelope: &Envelope) -> Result<()> {
        let data = envelope.to_bytes()?;
        self.write_frame(&data).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_frame_round_trip_empty() {
        let (a, b) = duplex(64);
        let mut tx = Connection::new(a);
        let mut rx = Connection::new(b);

        tx.write_frame(&[]).await.unwrap();
        assert_eq!(rx.read_frame().await.unwrap(), Some(Vec::new()));
    }

    #[tokio::test]
    async fn test_frame_round_trip_multi_megabyte() {
        // Small pipe buffer forces many short reads and partial writes.
        let (a, b) = duplex(8 * 1024);
        let payload: Vec<u8> = (0..3 * 1024 * 1024 + 17).map(|i| (i % 251) as u8).collect();
        let expected = payload.clone();

        let writer = tokio::spawn(async move {
            let mut tx = Connection::new(a);
            tx.write_frame(&payload).await.unwrap();
        });

        let mut rx = Connection::new(b);
        let received = rx.read_frame().await.unwrap().unwrap();
        writer.await.unwrap();

        assert_eq!(received, expected);
    }

    #[tokio::test]
    async fn test_header_is_big_endian() {
        let (a, mut b) = duplex(1024);
        let mut tx = Connection::new(a);
        tx.write_frame(&[9u8; 258]).await.unwrap();

        let mut header = [0u8; 4];
        b.read_exact(&mut header).await.unwrap();
        assert_eq!(header, [0, 0, 1, 2]);
    }

    #[tokio::test]
    async fn test_clean_close_returns_none() {
        let (a, b) = duplex(64);
        drop(a);
        let mut rx = Connection::new(b);
        assert!(rx.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_close_mid_payload_is_incomplete() {
        let (mut a, b) = duplex(64);
        a.write_all(&10u32.to_be_bytes()).await.unwrap();
        a.write_all(&[1, 2, 3]).await.unwrap();
        drop(a);

        let mut rx = Connection::new(b);
        match rx.read_frame().await {
            Err(ClusterError::Incomplete { expected, received }) => {
                assert_eq!(expected, 10);
                assert_eq!(received, 3);
            }
            other => panic!("expected incomplete frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_close_mid_header_is_incomplete() {
        let (mut a, b) = duplex(64);
        a.write_all(&[0, 0]).await.unwrap();
        drop(a);

        let mut rx = Connection::new(b);
        assert!(matches!(
            rx.read_frame().await,
            Err(ClusterError::Incomplete { expected: 4, received: 2 })
        ));
    }

    #[tokio::test]
    async fn test_oversized_header_is_rejected() {
        let (mut a, b) = duplex(64);
        a.write_all(&u32::MAX.to_be_bytes()).await.unwrap();

        let mut rx = Connection::new(b);
        assert!(matches!(
            rx.read_frame().await,
            Err(ClusterError::FrameTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_undecodable_frame_is_skipped() {
        let (a, b) = duplex(1024);
        let mut tx = Connection::new(a);
        tx.write_frame(b"not json").await.unwrap();
        tx.write_message(&Envelope::new(4, vec![1, 2])).await.unwrap();

        let mut rx = Connection::new(b);
        let envelope = rx.read_message().await.unwrap().unwrap();
        assert_eq!(envelope, Envelope::new(4, vec![1, 2]));
    }

    #[tokio::test]
    async fn test_split_halves_carry_envelopes() {
        let (a, b) = duplex(1024);
        let (mut a_read, mut a_write) = Connection::new(a).into_split();
        let (mut b_read, mut b_write) = Connection::new(b).into_split();

        a_write.write_message(&Envelope::new(1, vec![1])).await.unwrap();
        b_write.write_message(&Envelope::new(2, vec![2])).await.unwrap();

        assert_eq!(b_read.read_message().await.unwrap().unwrap().index, 1);
        assert_eq!(a_read.read_message().await.unwrap().unwrap().index, 2);
    }
}
