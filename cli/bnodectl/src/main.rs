//! bnode - CLI for provisioning and retiring backup nodes.
//!
//! The operator's interface to the fleet: spawn a node on a cloud
//! vendor, destroy it and reclaim everything it billed for, list what
//! is running, snapshot its disks.

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;
mod error;
mod output;

use commands::Cli;

#[tokio::main]
async fn main() {
    // Quiet by default; RUST_LOG=debug shows the lifecycle internals.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .init();

    let cli = Cli::parse();

    if let Err(e) = cli.run().await {
        error::print_error(&e);
        std::process::exit(1);
    }
}
