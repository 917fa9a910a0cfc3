//! # Worker
//!
//! Compute node of the cluster: receives image strips from the coordinator
//! and returns them block-compressed.

pub mod worker;

pub use worker::{WorkerCore, WorkerNode};
