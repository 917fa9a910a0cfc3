//! Distributed 8×8 DCT image compression: a front end hands whole images to
//! coordinators, which split them into strips across their workers.

pub mod common;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod processing;
pub mod worker;

pub use common::messages::Envelope;
pub use coordinator::Coordinator;
pub use dispatch::DispatchPool;
pub use error::{ClusterError, Result};
pub use worker::WorkerNode;
