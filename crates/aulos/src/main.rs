use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use aulos::config::Config;
use aulos::server;

#[derive(Debug, Parser)]
#[command(name = "aulos", about = "HTTP media-proxy gateway")]
struct Cli {
    /// Path to a JSON config file (falls back to CONFIG_PATH, then the
    /// embedded default).
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load config: {e}");
            return ExitCode::FAILURE;
        }
    };

    let default_level = if config.debug() { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();
    if config.debug() {
        info!("debug logging enabled");
    }

    if let Err(e) = server::serve(config).await {
        error!("server exited with error: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
