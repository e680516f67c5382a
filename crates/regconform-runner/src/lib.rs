//! # Regconform Runner
//!
//! Runs the conformance suite against an OCI distribution registry.
//!
//! This crate provides:
//!
//! - [`RunnerConfig`] - YAML file plus `OCI_*` environment overlay
//! - [`Runner`] - Pushes, pulls, lists, mounts and deletes every dataset,
//!   sequentially or concurrently
//! - [`MemoryRegistry`] - An in-process registry with switchable misbehaviour
//! - [`Report`] and the [`reporter`] formatters
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use regconform_runner::{MemoryRegistry, Runner, RunnerConfig};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let runner = Runner::new(RunnerConfig::default(), Arc::new(MemoryRegistry::new())).unwrap();
//! let outcome = runner.run().await.unwrap();
//! assert!(outcome.report.passed());
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod memory;
pub mod report;
pub mod reporter;
pub mod runner;

pub use config::{DataToggles, RunnerConfig};
pub use error::{Result, RunnerError};
pub use memory::{MemoryRegistry, Misbehavior};
pub use report::{CapabilityReport, DatasetReport, NodeReport, Report};
pub use reporter::{ConsoleReporter, JsonReporter, Reporter};
pub use runner::{CancelHandle, RunOutcome, Runner};
