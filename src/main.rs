//! certverify - runs certification scenarios against a Kubernetes cluster
//!
//! Each scenario provisions fixtures, runs the external certification tool
//! for one test plan and checks the verdict its ledgers report.

use std::path::PathBuf;

use clap::Parser;
use certverify::common::{config::Config, logging};
use certverify::{cli, commands::Commands};

#[derive(Parser)]
#[command(name = "certverify", about = "Certification scenario runner")]
#[command(version, long_about = None)]
struct Cli {
    /// Configuration file (default: ~/.config/certverify/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            logging::init_cli(cli.verbose);
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
    };

    match &cli.command {
        Commands::Run { .. } => {
            if let Some(log) = logging::init_with_file(&config.certsuite.artifacts_dir, cli.verbose) {
                tracing::debug!(path = %log.display(), "logging to file");
            }
        }
        _ => logging::init_cli(cli.verbose),
    }

    match cli::dispatch(cli.command, config).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(2);
        }
    }
}
