//! # Coordinator
//!
//! Cluster server that splits each incoming image across its connected
//! workers and stitches their replies back together.

pub mod job;
pub mod pool;
pub mod server;
pub mod split;

pub use pool::{WorkerEvent, WorkerId, WorkerPool};
pub use server::Coordinator;
