//! # Borrower Binary
//!
//! ```text
//! borrower [--config borrower.toml] [--log-level info] [run | check-config | status]
//! ```
//!
//! ## Environment Variables
//!
//! - `BORROWER_ENV_FILE`: dotenv file loaded first (default `.env`)
//! - `BORROWER_CONFIG`: config file path (default `borrower.toml`)
//! - `RUST_LOG`: log filter (default `info`)

mod cli;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    cli::load_env_file();
    let args = Cli::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match args.cmd.unwrap_or(Commands::Run) {
        Commands::Run => cli::run(&args.config).await,
        Commands::CheckConfig => cli::check_config(&args.config),
        Commands::Status => cli::status(&args.config).await,
    }
}
