//! # Configuration
//!
//! Resolved configuration structs for the three process roles, plus the TOML
//! loader shared by all binaries. Core components only ever see these structs;
//! where the values come from is the binaries' business.

use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

use crate::error::{ClusterError, Result};

/// Load a TOML configuration file and deserialize it into the specified type.
///
/// # Example
/// ```ignore
/// let config: CoordinatorConfig = load_config("config/coordinator.toml")?;
/// ```
pub fn load_config<T>(path: &str) -> Result<T>
where
    T: for<'de> Deserialize<'de>,
{
    let content = fs::read_to_string(path)
        .map_err(|e| ClusterError::Config(format!("cannot read {}: {}", path, e)))?;
    let config: T = toml::from_str(&content)?;
    Ok(config)
}

/// Image container used when a codec or the stitcher re-encodes pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "lowercase")]
pub enum ContainerFormat {
    Png,
    Jpeg { quality: u8 },
}

impl Default for ContainerFormat {
    fn default() -> Self {
        ContainerFormat::Jpeg { quality: 90 }
    }
}

fn default_reconnect_delay_ms() -> u64 {
    100
}

/// Worker node settings.
///
/// ```toml
/// coordinator_address = "127.0.0.1:7001"
///
/// [output]
/// format = "jpeg"
/// quality = 90
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Coordinator's worker listener (e.g. "127.0.0.1:7001")
    pub coordinator_address: String,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Container the compressed strip is returned in
    #[serde(default)]
    pub output: ContainerFormat,
}

impl WorkerConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Coordinator (cluster server) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Front end's coordinator listener the coordinator connects to
    pub upstream_address: String,
    /// Address workers connect to
    pub worker_listen_address: String,
    /// Upper bound on collecting every strip of one job
    pub job_timeout_secs: u64,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Container of the stitched image returned upstream
    #[serde(default)]
    pub output: ContainerFormat,
}

impl CoordinatorConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Front-end dispatch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrontendConfig {
    /// HTTP ingress address (e.g. "127.0.0.1:3000")
    pub http_listen_address: String,
    /// Address coordinators connect to
    pub coordinator_listen_address: String,
    /// Ceiling on callers admitted while every coordinator link is busy
    pub max_concurrent_callers: usize,
    /// How long an admitted caller may wait for a free link
    pub admission_wait_secs: u64,
    /// How long a dispatched job may take before it is abandoned
    pub reply_timeout_secs: u64,
}

impl FrontendConfig {
    pub fn dispatch(&self) -> DispatchSettings {
        DispatchSettings {
            max_concurrent_callers: self.max_concurrent_callers,
            admission_wait: Duration::from_secs(self.admission_wait_secs),
            reply_timeout: Duration::from_secs(self.reply_timeout_secs),
        }
    }
}

/// The part of [`FrontendConfig`] the dispatch pool itself needs.
#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    pub max_concurrent_callers: usize,
    pub admission_wait: Duration,
    pub reply_timeout: Duration,
}
