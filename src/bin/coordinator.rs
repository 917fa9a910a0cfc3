//! # Coordinator Binary Entry Point
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin coordinator -- --config config/coordinator.toml
//! ```
//!
//! The coordinator:
//! 1. Listens for worker connections on `worker_listen_address`
//! 2. Connects to the front end at `upstream_address`, retrying until it is up
//! 3. Splits each job it receives across the free workers and returns the
//!    stitched result

use clap::Parser;
use log::info;

use dct_cluster::common::config::{load_config, CoordinatorConfig};
use dct_cluster::common::logging::init_logger;
use dct_cluster::coordinator::Coordinator;

/// Command-line arguments for the coordinator binary
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the coordinator configuration file (TOML format)
    ///
    /// Example: config/coordinator.toml
    #[arg(short, long)]
    config: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logger();

    let args = Args::parse();
    let config: CoordinatorConfig = load_config(&args.config)?;

    info!(
        "🚀 Coordinator starting (upstream {}, workers on {})",
        config.upstream_address, config.worker_listen_address
    );

    Coordinator::new(config).run().await?;

    Ok(())
}
