mod cli;

use clap::Parser;
use cli::{Cli, Commands};
use mediafetch::api;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mediafetch=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server(args) => api::run(args.address).await?,
    }

    Ok(())
}
