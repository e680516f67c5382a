//! Regconform CLI - Command-line interface for the registry conformance suite.

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

use commands::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "regconform=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let status = match cli.command {
        Commands::Run(args) => commands::run::execute(args).await?,
        Commands::SelfTest(args) => commands::self_test::execute(args).await?,
        Commands::Version => {
            println!("regconform {}", env!("CARGO_PKG_VERSION"));
            return Ok(ExitCode::SUCCESS);
        }
    };
    Ok(ExitCode::from(commands::run::exit_code(status)))
}
