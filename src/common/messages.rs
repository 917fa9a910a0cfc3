//! # Envelope Protocol
//!
//! Defines the single message type exchanged on every hop of the cluster:
//! front end ↔ coordinator and coordinator ↔ worker.
//!
//! An [`Envelope`] is serialized to a compact JSON map and sent over TCP with a
//! 4-byte length prefix (see [`connection`](super::connection)):
//!
//! ```text
//! {"index": 2, "payload": "<base64 bytes>"}
//! {"index": 2, "payload": "", "error": "no workers available"}
//! ```
//!
//! The binary payload is base64-encoded so the map stays valid JSON without
//! inflating every byte into a number array.

use serde::{Deserialize, Serialize};

use super::connection::MAX_FRAME_SIZE;
use crate::error::Result;

/// Upper bound on the JSON text surrounding the base64 payload of a
/// successful envelope (`{"index":4294967295,"payload":""}` is 33 bytes).
const ENVELOPE_OVERHEAD: usize = 128;

/// Largest payload whose encoded envelope still fits in one frame.
///
/// Base64 turns every 3 payload bytes into 4 characters.
pub const MAX_PAYLOAD_SIZE: usize = (MAX_FRAME_SIZE - ENVELOPE_OVERHEAD) / 4 * 3;

/// Indexed unit of wire exchange.
///
/// `index` is assigned once by whoever creates the job or strip and is echoed
/// unchanged by the receiving side. `payload` is opaque: a whole image between
/// front end and coordinator, one strip between coordinator and worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Strip number (coordinator ↔ worker) or job number (front end ↔ coordinator)
    pub index: u32,

    /// Image bytes; always empty when `error` is set
    #[serde(with = "base64_bytes")]
    pub payload: Vec<u8>,

    /// Failure reason for a job that produced no image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    pub fn new(index: u32, payload: Vec<u8>) -> Self {
        Self {
            index,
            payload,
            error: None,
        }
    }

    /// Build a failure reply for `index`.
    ///
    /// The payload is left empty: a successful job always carries an encoded
    /// image, so an empty payload together with `error` is unambiguous.
    pub fn failure(index: u32, reason: impl Into<String>) -> Self {
        Self {
            index,
            payload: Vec::new(),
            error: Some(reason.into()),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }

    /// Serialize the envelope to JSON bytes for transmission.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserialize an envelope from JSON bytes received from the network.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
