//! Operator CLI entry point.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands, QueryCommands};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize `tracing` with `RUST_LOG` taking precedence over `log_level`.
fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::registry().with(filter).with(fmt::layer()).init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level.to_string());

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "bag-cli starting");

    let result = match cli.command {
        Commands::Ingest { file } => commands::ingest(&file).await,
        Commands::Daemon { workers } => commands::daemon(workers).await,
        Commands::Query { command } => match command {
            QueryCommands::StreamInfo => commands::query_stream_info().await,
            QueryCommands::Bag { tag } => commands::query_bag(&tag).await,
            QueryCommands::Journey { tag } => commands::query_journey(&tag).await,
        },
        Commands::Reconcile => commands::reconcile().await,
    };

    if let Err(err) = result {
        tracing::error!(error = %err, "command failed");
        eprintln!("error: {err}");
        for cause in err.chain().skip(1) {
            eprintln!("  caused by: {cause}");
        }
        std::process::exit(1);
    }
}
