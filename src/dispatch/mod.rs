//! # Front-End Dispatch
//!
//! Pool of coordinator links behind a single `submit` call that is safe to
//! use from many concurrent request handlers.

pub mod link;
pub mod pool;
pub mod stats;

pub use pool::DispatchPool;
pub use stats::{DispatchStats, StatsSnapshot};
