//! Run command implementation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use regconform_core::Status;
use regconform_registry::TlsMode;
use regconform_runner::{Runner, RunnerConfig};
use tracing::{error, info, warn};

use super::OutputArgs;

/// Arguments for the run command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// YAML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Registry host, with optional port
    #[arg(long)]
    pub registry: Option<String>,

    /// Transport security (enabled, insecure, disabled)
    #[arg(long)]
    pub tls: Option<TlsMode>,

    /// Primary test repository
    #[arg(long)]
    pub repo1: Option<String>,

    /// Secondary repository, the mount target
    #[arg(long)]
    pub repo2: Option<String>,

    /// Run datasets concurrently
    #[arg(short, long)]
    pub parallel: bool,

    /// Seed for reproducible test content
    #[arg(long)]
    pub seed: Option<u64>,

    /// Per-call timeout in seconds (0 disables it)
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Print the effective configuration and exit
    #[arg(long)]
    pub dump_config: bool,

    #[command(flatten)]
    pub output: OutputArgs,
}

/// Builds the effective configuration: file, then environment, then flags.
pub fn load_config(args: &RunArgs) -> Result<RunnerConfig> {
    load_config_with(args, |key| std::env::var(key).ok())
}

/// Like [`load_config`], reading `OCI_*` values through `lookup`.
fn load_config_with<F>(args: &RunArgs, lookup: F) -> Result<RunnerConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match &args.config {
        Some(path) => RunnerConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => RunnerConfig::default(),
    };
    config
        .apply_env(lookup)
        .context("Invalid OCI_* environment")?;

    if let Some(registry) = &args.registry {
        config.registry.clone_from(registry);
    }
    if let Some(tls) = args.tls {
        config.tls = tls;
    }
    if let Some(repo) = &args.repo1 {
        config.repo1.clone_from(repo);
    }
    if let Some(repo) = &args.repo2 {
        config.repo2.clone_from(repo);
    }
    if args.parallel {
        config.parallel = true;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    if let Some(secs) = args.timeout_secs {
        config.timeout_secs = (secs > 0).then_some(secs);
    }

    config.validate()?;
    Ok(config)
}

/// Process exit code for a run status: 1 on Fail, 2 on Error.
pub const fn exit_code(status: Status) -> u8 {
    match status {
        Status::Error => 2,
        Status::Fail => 1,
        _ => 0,
    }
}

/// Executes the run command.
pub async fn execute(args: RunArgs) -> Result<Status> {
    let config = load_config(&args)?;
    if args.dump_config {
        print!("{}", serde_yaml::to_string(&config)?);
        return Ok(Status::Pass);
    }

    let runner = Runner::connect(config).context("Failed to set up the registry client")?;
    let registry = runner.config().registry.clone();
    runner
        .distribution()
        .ping()
        .await
        .with_context(|| format!("Registry {registry} does not serve the v2 API"))?;
    info!(registry = %registry, "Registry reachable");

    let cancel = runner.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling outstanding calls");
            cancel.cancel();
        }
    });

    let outcome = runner.run().await?;
    args.output.emit(&outcome.report)?;

    if let Some(err) = outcome.joined_error() {
        error!("{err}");
    }
    Ok(outcome.status())
}
