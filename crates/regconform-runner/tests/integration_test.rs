//! Integration tests for the conformance runner.
//!
//! Every test drives the full suite against the in-process registry, either
//! well-behaved or with one misbehaviour switched on, and checks how the
//! outcome lands in the capability matrix and the report.

use std::sync::Arc;

use regconform_core::{
    ApiToggles, Capability, DataShape, Digest, FixtureBuilder, GenOptions, Platform, Status,
};
use regconform_registry::Distribution;
use regconform_runner::{DataToggles, MemoryRegistry, Misbehavior, Runner, RunnerConfig};

fn config(shapes: &[DataShape]) -> RunnerConfig {
    RunnerConfig {
        data: DataToggles::only(shapes),
        seed: Some(42),
        ..RunnerConfig::default()
    }
}

fn runner_over(registry: &Arc<MemoryRegistry>, config: RunnerConfig) -> Runner {
    Runner::new(config, Arc::clone(registry) as _).expect("valid config")
}

#[tokio::test]
async fn test_image_pushed_with_rotating_strategies() {
    let mut builder = FixtureBuilder::with_seed("two-layer", 3);
    let opts = GenOptions::default();
    let (first, first_diff, _) = builder.gen_layer(0, &opts).unwrap();
    let (second, second_diff, _) = builder.gen_layer(1, &opts).unwrap();
    let (config_digest, _) = builder
        .gen_config(&Platform::linux_amd64(), &[first_diff, second_diff], &opts)
        .unwrap();
    let (manifest, _) = builder
        .gen_manifest(&config_digest, &[first.clone(), second.clone()], &opts)
        .unwrap();
    let dataset = builder.build();

    let registry = Arc::new(MemoryRegistry::new());
    let runner = runner_over(&registry, config(&[]));
    let outcome = runner.run_datasets(std::slice::from_ref(&dataset)).await;

    let matrix = runner.matrix();
    assert_eq!(matrix.status(Capability::BlobPostOnly), Status::Pass);
    assert_eq!(matrix.status(Capability::BlobPostPut), Status::Pass);
    assert_eq!(matrix.status(Capability::BlobPatchChunked), Status::Pass);
    assert_eq!(matrix.status(Capability::ManifestPutDigest), Status::Pass);
    assert_eq!(matrix.status(Capability::ManifestPutTag), Status::Unknown);
    assert_eq!(outcome.report.dataset("two-layer"), Some(Status::Pass));
    assert!(outcome.errors.is_empty());

    // Cleanup removed everything that was pushed.
    assert!(!registry.has_manifest("conformance/repo1", &manifest));
    assert!(!registry.has_blob("conformance/repo1", &first));
    assert_eq!(registry.open_uploads(), 0);
}

#[tokio::test]
async fn test_missing_subject_has_no_referrers() {
    let registry = Arc::new(MemoryRegistry::new());
    let mut config = config(&[DataShape::ArtifactWithMissingSubject]);
    config.api = ApiToggles {
        delete_tag: false,
        delete_manifest: false,
        delete_blob: false,
        ..ApiToggles::default()
    };
    let runner = runner_over(&registry, config);
    let dataset = runner.datasets().unwrap().remove(0);
    let outcome = runner.run_datasets(std::slice::from_ref(&dataset)).await;

    assert!(outcome.report.passed(), "{:?}", outcome.report.tree);
    assert_eq!(runner.matrix().status(Capability::ManifestPutSubject), Status::Pass);
    assert_eq!(runner.matrix().status(Capability::Referrers), Status::Pass);
    assert_eq!(runner.matrix().status(Capability::ManifestDelete), Status::Disabled);

    let subject = dataset.subjects().next().unwrap().clone();
    assert!(!dataset.is_pushed_manifest(&subject));
    let referrers = Distribution::new(registry as _)
        .referrers("conformance/repo1", &subject, None)
        .await
        .unwrap();
    assert!(referrers.manifests.is_empty());
}

#[tokio::test]
async fn test_every_shape_passes_sequentially() {
    let registry = Arc::new(MemoryRegistry::new());
    let runner = runner_over(&registry, config(&DataShape::ALL));
    let outcome = runner.run().await.unwrap();

    assert_eq!(outcome.status(), Status::Pass, "{:#?}", outcome.report.tree);
    assert!(outcome.joined_error().is_none());
    assert_eq!(outcome.report.datasets.len(), DataShape::ALL.len());
    for capability in [
        Capability::BlobMountSource,
        Capability::BlobMountAnonymous,
        Capability::TagList,
        Capability::Referrers,
        Capability::TagDeleteAtomic,
        Capability::ManifestDeleteAtomic,
        Capability::BlobDeleteAtomic,
    ] {
        assert_eq!(runner.matrix().status(capability), Status::Pass, "{capability}");
    }
    assert!(registry.tags("conformance/repo1").is_empty());
}

#[tokio::test]
async fn test_every_shape_passes_in_parallel() {
    let registry = Arc::new(MemoryRegistry::new());
    let runner = runner_over(
        &registry,
        RunnerConfig {
            parallel: true,
            ..config(&DataShape::ALL)
        },
    );
    let outcome = runner.run().await.unwrap();

    assert_eq!(outcome.status(), Status::Pass, "{:#?}", outcome.report.tree);
    let empty = Digest::canonical(b"{}");
    assert!(!registry.has_blob("conformance/repo1", &empty));
}

#[tokio::test]
async fn test_disabled_toggle_is_reported_disabled() {
    let registry = Arc::new(MemoryRegistry::new());
    let mut config = config(&[DataShape::Image]);
    config.api.tags = false;
    let runner = runner_over(&registry, config);
    let outcome = runner.run().await.unwrap();

    assert_eq!(runner.matrix().status(Capability::TagList), Status::Disabled);
    assert_eq!(outcome.report.capability(Capability::TagList), Status::Disabled);
    assert!(outcome.report.passed());
}

#[tokio::test]
async fn test_missing_subject_header_fails() {
    let registry = Arc::new(MemoryRegistry::with_misbehavior(Misbehavior {
        omit_subject_header: true,
        ..Misbehavior::default()
    }));
    let runner = runner_over(&registry, config(&[DataShape::ArtifactWithSubject]));
    let outcome = runner.run().await.unwrap();

    assert_eq!(runner.matrix().status(Capability::ManifestPutSubject), Status::Fail);
    assert_eq!(outcome.status(), Status::Fail);
    assert!(outcome.errors.is_empty());
    // Later phases depend on a clean push.
    let dataset = outcome.report.tree.find("artifact-with-subject").unwrap();
    assert_eq!(dataset.children.iter().find(|c| c.name == "pull").unwrap().status, Status::Skip);
}

#[tokio::test]
async fn test_ignored_range_fails() {
    let registry = Arc::new(MemoryRegistry::with_misbehavior(Misbehavior {
        reject_ranges: true,
        ..Misbehavior::default()
    }));
    let runner = runner_over(&registry, config(&[DataShape::Image]));
    let outcome = runner.run().await.unwrap();

    assert_eq!(runner.matrix().status(Capability::BlobGetRange), Status::Fail);
    assert_eq!(runner.matrix().status(Capability::BlobGetFull), Status::Pass);
    assert_eq!(outcome.report.dataset("image"), Some(Status::Fail));
}

#[tokio::test]
async fn test_refused_deletes_are_skipped() {
    let registry = Arc::new(MemoryRegistry::with_misbehavior(Misbehavior {
        refuse_deletes: true,
        ..Misbehavior::default()
    }));
    let runner = runner_over(&registry, config(&[DataShape::Image]));
    let outcome = runner.run().await.unwrap();

    for capability in [
        Capability::TagDelete,
        Capability::TagDeleteAtomic,
        Capability::ManifestDelete,
        Capability::ManifestDeleteAtomic,
        Capability::BlobDelete,
        Capability::BlobDeleteAtomic,
    ] {
        assert_eq!(runner.matrix().status(capability), Status::Skip, "{capability}");
    }
    assert!(outcome.report.passed());
}

#[tokio::test]
async fn test_stale_deletes_fail_atomic_checks() {
    let registry = Arc::new(MemoryRegistry::with_misbehavior(Misbehavior {
        stale_deletes: true,
        ..Misbehavior::default()
    }));
    let runner = runner_over(&registry, config(&[DataShape::Image]));
    let outcome = runner.run().await.unwrap();

    assert_eq!(runner.matrix().status(Capability::TagDelete), Status::Pass);
    assert_eq!(runner.matrix().status(Capability::TagDeleteAtomic), Status::Fail);
    assert_eq!(runner.matrix().status(Capability::ManifestDeleteAtomic), Status::Fail);
    assert_eq!(runner.matrix().status(Capability::BlobDeleteAtomic), Status::Fail);
    assert_eq!(outcome.status(), Status::Fail);
}

#[tokio::test]
async fn test_referrers_unsupported_is_skipped() {
    let registry = Arc::new(MemoryRegistry::with_misbehavior(Misbehavior {
        no_referrers: true,
        ..Misbehavior::default()
    }));
    let runner = runner_over(&registry, config(&[DataShape::ArtifactWithSubject]));
    let outcome = runner.run().await.unwrap();

    assert_eq!(runner.matrix().status(Capability::Referrers), Status::Skip);
    assert!(outcome.report.passed());
}

#[tokio::test]
async fn test_cancelled_run_reports_errors() {
    let registry = Arc::new(MemoryRegistry::new());
    let runner = runner_over(&registry, config(&[DataShape::Image]));
    runner.cancel_handle().cancel();
    let outcome = runner.run().await.unwrap();

    assert_eq!(outcome.status(), Status::Error);
    assert_eq!(runner.matrix().status(Capability::BlobPush), Status::Error);
    let err = outcome.joined_error().expect("errors were collected");
    assert!(err.to_string().contains("image/push blobs/"));
    assert!(err.to_string().contains("cancelled"));
    assert!(!registry.has_manifest("conformance/repo1", &runner.datasets().unwrap()[0].manifest_order()[0]));
}
