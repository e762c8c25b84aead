#![warn(
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub,
    clippy::pedantic
)]
#![forbid(unsafe_code)]
#![allow(clippy::module_name_repetitions, clippy::similar_names)]

use clap::{Parser, Subcommand};
use galleria::tokio;
use tracing_subscriber::{EnvFilter, filter::LevelFilter};

mod check_storage;
mod config;

pub(crate) use config::CONFIG_BIN;
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify the configured object storage is reachable
    CheckStorage {},
    /// Print the version
    Version {},
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .json()
        .flatten_event(true)
        .with_current_span(true)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .init();

    match cli.command {
        Some(Commands::CheckStorage {}) => {
            check_storage::check_storage().await?;
        }
        Some(Commands::Version {}) => {
            println!("{VERSION}");
        }
        None => {
            eprintln!("No subcommand provided. Use --help for more information.");
            anyhow::bail!("No subcommand provided");
        }
    }

    Ok(())
}
