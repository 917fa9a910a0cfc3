//! # Common Components
//!
//! Shared utilities and data structures used by every process role.
//!
//! ## Modules
//!
//! - [`messages`]: the [`Envelope`](messages::Envelope) exchanged on every hop
//! - [`connection`]: length-prefixed frame transport over async streams
//! - [`config`]: configuration structs and TOML loading
//! - [`logging`]: logger initialisation for the binaries

pub mod config;
pub mod connection;
pub mod logging;
pub mod messages;
