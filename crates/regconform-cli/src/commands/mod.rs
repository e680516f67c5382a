//! CLI commands and argument parsing.

pub mod run;
pub mod self_test;

use std::io;

use clap::{Args, Parser, Subcommand, ValueEnum};
use regconform_runner::{ConsoleReporter, JsonReporter, Report, Reporter};

/// Regconform - OCI distribution registry conformance suite
#[derive(Parser)]
#[command(name = "regconform")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Run the conformance suite against a registry
    Run(run::RunArgs),

    /// Run the suite against the built-in in-memory registry
    SelfTest(self_test::SelfTestArgs),

    /// Print version information
    Version,
}

/// Report format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary
    Text,
    /// Full JSON report
    Json,
}

/// Report options shared by every command that runs the suite.
#[derive(Args, Debug)]
pub struct OutputArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Print every step, not only failures
    #[arg(short, long)]
    pub verbose: bool,
}

impl OutputArgs {
    /// Writes the report to stdout in the chosen format.
    pub fn emit(&self, report: &Report) -> io::Result<()> {
        let reporter: Box<dyn Reporter> = match self.output {
            OutputFormat::Text => Box::new(
                ConsoleReporter::new()
                    .with_colors(!self.no_color)
                    .with_verbose(self.verbose),
            ),
            OutputFormat::Json => Box::new(JsonReporter::new().with_pretty(true)),
        };
        reporter.report(report, &mut io::stdout().lock())
    }
}
