//! # Worker Binary Entry Point
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin worker -- --config config/worker.toml
//! ```
//!
//! The worker connects to its coordinator, compresses every strip it is sent
//! and reconnects whenever the coordinator goes away.

use clap::Parser;
use log::info;

use dct_cluster::common::config::{load_config, WorkerConfig};
use dct_cluster::common::logging::init_logger;
use dct_cluster::worker::WorkerNode;

/// Command-line arguments for the worker binary
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the worker configuration file (TOML format)
    ///
    /// Example: config/worker.toml
    #[arg(short, long)]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let args = Args::parse();
    let config: WorkerConfig = load_config(&args.config)?;

    info!(
        "🚀 Worker starting, coordinator at {} (output: {:?})",
        config.coordinator_address, config.output
    );

    WorkerNode::new(config).run().await;

    Ok(())
}
