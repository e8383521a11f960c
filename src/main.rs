// depsentry - dependency security analyzer
// Main CLI entry point

use clap::Parser;
use std::process;
use tracing_subscriber::EnvFilter;

use depsentry::cli::{Cli, CliDispatcher};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    // Exit code 0 whenever a report was produced; non-zero only on
    // catastrophic failure before any report could be written
    if let Err(err) = CliDispatcher::execute(cli.command).await {
        eprintln!("Error: {}", err);
        process::exit(1);
    }
}
