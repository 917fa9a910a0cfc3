//! # Error Types
//!
//! Every fallible operation in the library returns [`ClusterError`]. Transport
//! and codec failures are handled close to where they happen (logged, message
//! dropped); only the outcome of a whole job travels back to the caller.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ClusterError>;

#[derive(Error, Debug)]
pub enum ClusterError {
    /// Socket or file I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the connection before a whole frame arrived
    #[error("incomplete frame: expected {expected} bytes, received {received}")]
    Incomplete { expected: usize, received: usize },

    /// Declared frame length exceeds the protocol limit
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Envelope (de)serialization failed
    #[error("envelope encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Image container could not be decoded or encoded
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// Codec-level failure that is not an image container problem
    #[error("codec error: {0}")]
    Codec(String),

    /// A job arrived while no worker was connected
    #[error("no workers available")]
    NoWorkers,

    /// Admission ceiling reached and no coordinator link is free
    #[error("pool saturated: {admitted} callers already admitted")]
    PoolSaturated { admitted: usize },

    /// A bounded wait expired
    #[error("timed out: {0}")]
    Timeout(String),

    /// The connection carrying a job went away before replying
    #[error("link closed")]
    LinkClosed,

    /// The remote side reported that the job failed
    #[error("job failed: {0}")]
    JobFailed(String),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<toml::de::Error> for ClusterError {
    fn from(e: toml::de::Error) -> Self {
        ClusterError::Config(e.to_string())
    }
}
