//! Self-test command implementation.
//!
//! Runs the full suite against the in-process registry. A conformant build
//! passes every step; the misbehaviour flags show what a broken registry
//! looks like in the report.

use std::sync::Arc;

use anyhow::Result;
use clap::Args;
use regconform_core::Status;
use regconform_runner::{MemoryRegistry, Misbehavior, Runner, RunnerConfig};
use tracing::{error, info};

use super::OutputArgs;

/// Arguments for the self-test command.
#[derive(Args, Debug)]
#[allow(clippy::struct_excessive_bools)]
pub struct SelfTestArgs {
    /// Run datasets concurrently
    #[arg(short, long)]
    pub parallel: bool,

    /// Seed for reproducible test content
    #[arg(long)]
    pub seed: Option<u64>,

    /// Answer range requests with the full blob
    #[arg(long)]
    pub reject_ranges: bool,

    /// Leave out the OCI-Subject header on manifest pushes
    #[arg(long)]
    pub omit_subject_header: bool,

    /// Refuse every delete with 405
    #[arg(long)]
    pub refuse_deletes: bool,

    /// Accept deletes but keep the content
    #[arg(long)]
    pub stale_deletes: bool,

    #[command(flatten)]
    pub output: OutputArgs,
}

impl SelfTestArgs {
    fn misbehavior(&self) -> Misbehavior {
        Misbehavior {
            reject_ranges: self.reject_ranges,
            omit_subject_header: self.omit_subject_header,
            refuse_deletes: self.refuse_deletes,
            stale_deletes: self.stale_deletes,
            ..Misbehavior::default()
        }
    }
}

/// Executes the self-test command.
pub async fn execute(args: SelfTestArgs) -> Result<Status> {
    let config = RunnerConfig {
        registry: "memory".to_string(),
        parallel: args.parallel,
        seed: args.seed,
        ..RunnerConfig::default()
    };
    let registry = Arc::new(MemoryRegistry::with_misbehavior(args.misbehavior()));
    info!(misbehavior = ?args.misbehavior(), "Running self-test against the in-memory registry");

    let runner = Runner::new(config, registry)?;
    let outcome = runner.run().await?;
    args.output.emit(&outcome.report)?;

    if let Some(err) = outcome.joined_error() {
        error!("{err}");
    }
    Ok(outcome.status())
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;
    use crate::commands::{Cli, Commands};

    fn parse(argv: &[&str]) -> SelfTestArgs {
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::SelfTest(args) => args,
            _ => panic!("expected the self-test command"),
        }
    }

    #[test]
    fn test_misbehavior_flags() {
        let args = parse(&["regconform", "self-test", "--reject-ranges", "--stale-deletes", "--no-color"]);
        let misbehavior = args.misbehavior();
        assert!(misbehavior.reject_ranges);
        assert!(misbehavior.stale_deletes);
        assert!(!misbehavior.refuse_deletes);
        assert!(args.output.no_color);
    }

    #[tokio::test]
    async fn test_conformant_self_test_succeeds() {
        let args = parse(&["regconform", "self-test", "--seed", "5", "--output", "json"]);
        assert_eq!(execute(args).await.unwrap(), Status::Pass);
    }
}
