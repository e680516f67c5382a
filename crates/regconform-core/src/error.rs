//! Error types for regconform core operations.

use thiserror::Error;

use crate::capability::Capability;

/// Result type alias using [`FixtureError`] as the error type.
pub type Result<T> = std::result::Result<T, FixtureError>;

/// Errors raised while synthesizing fixture data.
///
/// Any of these during dataset generation is fatal for the whole run.
#[derive(Error, Debug)]
pub enum FixtureError {
    /// Index generation received a different number of platforms and manifests.
    #[error("index requires one platform per manifest: {platforms} platforms, {manifests} manifests")]
    IndexArity {
        /// Number of platforms supplied.
        platforms: usize,
        /// Number of manifest digests supplied.
        manifests: usize,
    },

    /// A referenced digest has no descriptor in the graph.
    #[error("digest {digest} is not registered in dataset {dataset}")]
    UnknownDigest {
        /// Dataset name.
        dataset: String,
        /// Digest that could not be resolved.
        digest: String,
    },

    /// A push-order entry precedes something it references.
    #[error("manifest {entry} is ordered before its reference {reference}")]
    OrderViolation {
        /// The offending push-order entry.
        entry: String,
        /// The reference that should have come first.
        reference: String,
    },

    /// A digest string could not be parsed.
    #[error("invalid digest '{value}': {reason}")]
    InvalidDigest {
        /// Offending value.
        value: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Building a layer archive failed.
    #[error("failed to build layer archive: {0}")]
    Archive(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by the capability gate.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    /// One or more requested operations are disabled by configuration.
    #[error("disabled by configuration: {}", join_names(.operations))]
    Disabled {
        /// Every disabled operation among those requested.
        operations: Vec<Capability>,
    },
}

fn join_names(operations: &[Capability]) -> String {
    operations
        .iter()
        .map(|op| op.name())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_index_arity() {
        let err = FixtureError::IndexArity {
            platforms: 2,
            manifests: 1,
        };
        assert_eq!(
            err.to_string(),
            "index requires one platform per manifest: 2 platforms, 1 manifests"
        );
    }

    #[test]
    fn test_error_display_disabled_names_every_operation() {
        let err = CapabilityError::Disabled {
            operations: vec![Capability::BlobDelete, Capability::ManifestDelete],
        };
        assert_eq!(
            err.to_string(),
            "disabled by configuration: blob-delete, manifest-delete"
        );
    }
}
