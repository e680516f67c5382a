//! Property-based tests for regconform-core types.
//!
//! These tests use proptest to check lattice laws and content addressing
//! across many randomly generated inputs.

use proptest::prelude::*;

use crate::{
    Capability, CapabilityMatrix, Digest, DigestAlgorithm, FixtureBuilder, GenOptions, Platform, Status,
};

/// Strategy for generating statuses.
fn status_strategy() -> impl Strategy<Value = Status> {
    prop::sample::select(Status::ALL.to_vec())
}

/// Strategy for generating capabilities.
fn capability_strategy() -> impl Strategy<Value = Capability> {
    prop::sample::select(Capability::ALL.to_vec())
}

/// Strategy for generating digest algorithms.
fn algorithm_strategy() -> impl Strategy<Value = DigestAlgorithm> {
    prop_oneof![Just(DigestAlgorithm::Sha256), Just(DigestAlgorithm::Sha512)]
}

/// Strategy for generating generator options.
fn options_strategy() -> impl Strategy<Value = GenOptions> {
    (algorithm_strategy(), any::<bool>(), any::<bool>()).prop_map(|(algorithm, inline, compress)| {
        GenOptions::default()
            .with_algorithm(algorithm)
            .with_inline_data(inline)
            .with_compress(compress)
    })
}

proptest! {
    /// Merge is commutative.
    #[test]
    fn status_merge_commutative(a in status_strategy(), b in status_strategy()) {
        prop_assert_eq!(a.merge(b), b.merge(a));
    }

    /// Merge is idempotent.
    #[test]
    fn status_merge_idempotent(a in status_strategy()) {
        prop_assert_eq!(a.merge(a), a);
    }

    /// Merge never lowers either operand.
    #[test]
    fn status_merge_monotone(a in status_strategy(), b in status_strategy()) {
        let merged = a.merge(b);
        prop_assert!(merged >= a);
        prop_assert!(merged >= b);
        prop_assert!(merged == a || merged == b);
    }

    /// Merge is associative, so fold order does not matter.
    #[test]
    fn status_merge_associative(a in status_strategy(), b in status_strategy(), c in status_strategy()) {
        prop_assert_eq!(a.merge(b).merge(c), a.merge(b.merge(c)));
    }

    /// Status names parse back to the same status.
    #[test]
    fn status_name_roundtrip(status in status_strategy()) {
        prop_assert_eq!(status.as_str().parse::<Status>().unwrap(), status);
    }

    /// A matrix entry is the worst status ever reported.
    #[test]
    fn capability_entry_is_worst_reported(
        op in capability_strategy(),
        reports in prop::collection::vec(status_strategy(), 0..16),
    ) {
        let matrix = CapabilityMatrix::default();
        for status in &reports {
            matrix.escalate(op, *status);
        }
        let worst = reports.iter().copied().fold(Status::Unknown, Status::merge);
        prop_assert_eq!(matrix.status(op), worst);
    }

    /// Blobs are stored under the hash of their bytes.
    #[test]
    fn add_blob_digest_roundtrip(
        bytes in prop::collection::vec(any::<u8>(), 0..512),
        algorithm in algorithm_strategy(),
    ) {
        let mut builder = FixtureBuilder::with_seed("prop", 0);
        let digest = builder.add_blob(bytes.clone(), &GenOptions::default().with_algorithm(algorithm)).unwrap();
        prop_assert_eq!(digest.algorithm(), algorithm);
        prop_assert!(digest.verifies(&bytes));

        let dataset = builder.build();
        prop_assert_eq!(dataset.blob(&digest), Some(bytes.as_slice()));
    }

    /// Digest strings parse back to the same digest.
    #[test]
    fn digest_string_roundtrip(bytes in prop::collection::vec(any::<u8>(), 0..64), algorithm in algorithm_strategy()) {
        let digest = algorithm.digest(&bytes);
        prop_assert_eq!(digest.to_string().parse::<Digest>().unwrap(), digest);
    }

    /// Every generator stores bytes that hash to their key.
    #[test]
    fn generators_digest_roundtrip(
        seed in any::<u64>(),
        size in 0usize..1024,
        layers in 1usize..4,
        opts in options_strategy(),
    ) {
        let mut builder = FixtureBuilder::with_seed("prop", seed);
        let (blob, blob_bytes) = builder.gen_blob(size, &opts).unwrap();
        prop_assert!(blob.verifies(&blob_bytes));

        let mut pushable = Vec::new();
        let mut diff_ids = Vec::new();
        for index in 0..layers {
            let (compressed, uncompressed, bytes) = builder.gen_layer(index, &opts).unwrap();
            prop_assert!(compressed.verifies(&bytes));
            prop_assert_eq!(compressed == uncompressed, !opts.compress);
            pushable.push(compressed);
            diff_ids.push(uncompressed);
        }

        let platform = Platform::linux_amd64();
        let (config, config_bytes) = builder.gen_config(&platform, &diff_ids, &opts).unwrap();
        prop_assert!(config.verifies(&config_bytes));

        let (manifest, manifest_bytes) = builder.gen_manifest(&config, &pushable, &opts).unwrap();
        prop_assert!(manifest.verifies(&manifest_bytes));

        let (index, index_bytes) = builder.gen_index(&[platform], &[manifest], &opts).unwrap();
        prop_assert!(index.verifies(&index_bytes));

        let dataset = builder.build();
        for (digest, bytes) in dataset.blobs() {
            prop_assert!(digest.verifies(bytes));
        }
        for digest in dataset.manifest_order() {
            prop_assert!(digest.verifies(dataset.manifest(digest).unwrap()));
        }
        prop_assert!(dataset.check_order().is_ok());
    }
}
