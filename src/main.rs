//! eazy CLI entrypoint

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use eazy::cli::Cli;

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    // Parse, run, and exit with the cleanup's code
    let cli = Cli::parse();
    let exit_code = cli.execute().await;
    std::process::exit(exit_code);
}
