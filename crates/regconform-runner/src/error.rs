//! Error types for the conformance runner.

use std::path::PathBuf;

use regconform_core::FixtureError;
use regconform_registry::RegistryError;
use thiserror::Error;

/// Result type alias for runner operations.
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Errors that can occur while configuring or executing a run.
#[derive(Error, Debug)]
pub enum RunnerError {
    /// Fixture generation failed; no test was executed.
    #[error("Fixture generation failed: {0}")]
    Fixture(#[from] FixtureError),

    /// Failed to read a configuration file.
    #[error("Failed to read config file {path}: {source}")]
    ConfigRead {
        /// Path to the file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse a configuration file.
    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    /// A configuration value is invalid.
    #[error("Invalid configuration: {message}")]
    Config {
        /// Error message.
        message: String,
    },

    /// The registry client could not be set up.
    #[error("Registry setup failed: {0}")]
    Registry(#[from] RegistryError),

    /// Steps failed for reasons unrelated to registry conformance.
    #[error("{} step(s) errored:\n  {}", .errors.len(), .errors.join("\n  "))]
    Steps {
        /// One line per errored step.
        errors: Vec<String>,
    },
}

impl RunnerError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }
}
