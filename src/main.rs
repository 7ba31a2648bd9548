// Resticmate - profile manager and task scheduler for restic
// Main entry point

use anyhow::Result;
use clap::Parser;

use resticmate::cli::{self, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing; RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let code = cli::run(cli).await?;
    std::process::exit(code)
}
