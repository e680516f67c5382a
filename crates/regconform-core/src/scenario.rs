//! Dataset shapes a conformance run pushes.
//!
//! Each [`DataShape`] synthesizes one self-contained [`Dataset`] through the
//! [`FixtureBuilder`]. Shapes differ in which parts of the protocol they
//! stress: multi-platform indices, sparse indices whose children are never
//! pushed, artifacts, and subject links that do or do not resolve.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::digest::Digest;
use crate::error::Result;
use crate::fixture::{Dataset, FixtureBuilder, GenOptions};
use crate::oci::{MediaType, Platform};

/// Artifact type carried by generated artifacts.
pub const ARTIFACT_TYPE: &str = "application/vnd.regconform.test.v1";

/// Media type of artifact payload blobs.
pub const ARTIFACT_LAYER_TYPE: &str = "application/vnd.regconform.test.data.v1";

/// Artifact type of generated signature-like referrers.
pub const SIGNATURE_TYPE: &str = "application/vnd.regconform.signature.v1";

/// A synthetic data shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DataShape {
    /// Single-platform image: two gzip layers, config, manifest.
    Image,
    /// Multi-platform index over two images.
    Index,
    /// Index whose second child manifest is described but never pushed.
    SparseIndex,
    /// Artifact manifest with the empty config and an opaque payload.
    Artifact,
    /// Image plus two referrers (a manifest and an index) naming it as subject.
    ArtifactWithSubject,
    /// Artifact whose subject digest never exists in the registry.
    ArtifactWithMissingSubject,
    /// Index containing another index.
    NestedIndex,
}

impl DataShape {
    /// Every shape, in run order.
    pub const ALL: [Self; 7] = [
        Self::Image,
        Self::Index,
        Self::SparseIndex,
        Self::Artifact,
        Self::ArtifactWithSubject,
        Self::ArtifactWithMissingSubject,
        Self::NestedIndex,
    ];

    /// Configuration name of the shape.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Index => "index",
            Self::SparseIndex => "sparse-index",
            Self::Artifact => "artifact",
            Self::ArtifactWithSubject => "artifact-with-subject",
            Self::ArtifactWithMissingSubject => "artifact-with-missing-subject",
            Self::NestedIndex => "nested-index",
        }
    }

    /// Synthesizes the dataset for this shape.
    ///
    /// A seed makes the random content reproducible.
    ///
    /// # Errors
    ///
    /// Returns any [`FixtureError`](crate::FixtureError) raised while
    /// generating; the run must not start.
    pub fn generate(self, seed: Option<u64>) -> Result<Dataset> {
        let mut builder = match seed {
            Some(seed) => FixtureBuilder::with_seed(self.name(), seed),
            None => FixtureBuilder::new(self.name()),
        };
        let opts = GenOptions::default();

        match self {
            Self::Image => {
                gen_image(&mut builder, &Platform::linux_amd64(), 2, &opts)?;
                builder.set_tag("image");
            }
            Self::Index => {
                let platforms = [Platform::linux_amd64(), Platform::linux_arm64()];
                let manifests = platforms
                    .iter()
                    .map(|p| gen_image(&mut builder, p, 1, &opts))
                    .collect::<Result<Vec<_>>>()?;
                builder.gen_index(&platforms, &manifests, &opts)?;
                builder.set_tag("index");
            }
            Self::SparseIndex => {
                let pushed = gen_image(&mut builder, &Platform::linux_amd64(), 1, &opts)?;
                let absent = gen_image(&mut builder, &Platform::linux_ppc64le(), 1, &opts.clone().detached())?;
                builder.gen_index(
                    &[Platform::linux_amd64(), Platform::linux_ppc64le()],
                    &[pushed, absent],
                    &opts,
                )?;
                builder.set_tag("sparse-index");
            }
            Self::Artifact => {
                gen_artifact(&mut builder, ARTIFACT_TYPE, &opts)?;
                builder.set_tag("artifact");
            }
            Self::ArtifactWithSubject => {
                let image = gen_image(&mut builder, &Platform::linux_amd64(), 1, &opts)?;
                let subject = builder
                    .descriptor(&image)
                    .cloned()
                    .ok_or_else(|| unknown(&builder, &image))?;
                let subject_opts = opts.clone().with_subject(subject);

                let signature = gen_artifact(
                    &mut builder,
                    SIGNATURE_TYPE,
                    &subject_opts.clone().with_annotation("org.opencontainers.image.title", "signature"),
                )?;
                builder.gen_index(
                    &[Platform::linux_amd64()],
                    &[signature],
                    &subject_opts.with_artifact_type(ARTIFACT_TYPE),
                )?;
            }
            Self::ArtifactWithMissingSubject => {
                let subject = builder.gen_external(128, MediaType::manifest(), &opts);
                gen_artifact(&mut builder, ARTIFACT_TYPE, &opts.clone().with_subject(subject))?;
            }
            Self::NestedIndex => {
                let platforms = [Platform::linux_amd64(), Platform::linux_arm64()];
                let manifests = platforms
                    .iter()
                    .map(|p| gen_image(&mut builder, p, 1, &opts))
                    .collect::<Result<Vec<_>>>()?;
                let (inner, _) = builder.gen_index(&platforms, &manifests, &opts)?;
                builder.gen_index(&[Platform::linux_amd64()], &[inner], &opts)?;
                builder.set_tag("nested-index");
            }
        }

        let dataset = builder.build();
        dataset.check_order()?;
        info!(
            dataset = %dataset.name(),
            blobs = dataset.blob_order().len(),
            manifests = dataset.manifest_order().len(),
            "Generated dataset"
        );
        Ok(dataset)
    }
}

impl fmt::Display for DataShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataShape {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|shape| shape.name() == s)
            .ok_or_else(|| format!("unknown data shape: {s}"))
    }
}

/// Generates `layers` gzip layers, a config over them and an image manifest.
fn gen_image(builder: &mut FixtureBuilder, platform: &Platform, layers: usize, opts: &GenOptions) -> Result<Digest> {
    let mut pushable = Vec::with_capacity(layers);
    let mut diff_ids = Vec::with_capacity(layers);
    for index in 0..layers {
        let (compressed, uncompressed, _) = builder.gen_layer(index, opts)?;
        pushable.push(compressed);
        diff_ids.push(uncompressed);
    }

    let (config, _) = builder.gen_config(platform, &diff_ids, opts)?;
    let (manifest, _) = builder.gen_manifest(&config, &pushable, opts)?;
    Ok(manifest)
}

/// Generates an artifact manifest: empty config plus one small inline blob.
fn gen_artifact(builder: &mut FixtureBuilder, artifact_type: &str, opts: &GenOptions) -> Result<Digest> {
    let config = builder.gen_empty_config(opts)?;
    let payload_opts = opts
        .clone()
        .with_media_type(ARTIFACT_LAYER_TYPE)
        .with_inline_data(true);
    let (payload, _) = builder.gen_blob(64, &payload_opts)?;

    let (manifest, _) = builder.gen_manifest(
        &config,
        &[payload],
        &opts.clone().with_artifact_type(artifact_type),
    )?;
    Ok(manifest)
}

fn unknown(builder: &FixtureBuilder, digest: &Digest) -> crate::FixtureError {
    crate::FixtureError::UnknownDigest {
        dataset: builder.name().to_string(),
        digest: digest.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::{Index, Manifest};

    #[test]
    fn test_every_shape_has_valid_push_order() {
        for shape in DataShape::ALL {
            let dataset = shape.generate(Some(1)).unwrap();
            assert_eq!(dataset.name(), shape.name());
            assert!(!dataset.manifest_order().is_empty(), "{shape}");
            dataset.check_order().unwrap();

            for (digest, bytes) in dataset.blobs() {
                assert!(digest.verifies(bytes), "{shape}: {digest}");
            }
            for digest in dataset.manifest_order() {
                assert!(digest.verifies(dataset.manifest(digest).unwrap()));
            }
        }
    }

    #[test]
    fn test_shape_names_round_trip() {
        for shape in DataShape::ALL {
            assert_eq!(shape.name().parse::<DataShape>().unwrap(), shape);
        }
        assert!("tarball".parse::<DataShape>().is_err());
    }

    #[test]
    fn test_image_is_tagged() {
        let dataset = DataShape::Image.generate(Some(3)).unwrap();
        assert_eq!(dataset.tag(), Some("image"));
        assert_eq!(dataset.manifest_order().len(), 1);
        assert_eq!(dataset.blob_order().len(), 3);
    }

    #[test]
    fn test_sparse_index_child_is_never_pushed() {
        let dataset = DataShape::SparseIndex.generate(Some(5)).unwrap();
        let top = dataset.manifest_order().last().unwrap();
        let index: Index = serde_json::from_slice(dataset.manifest(top).unwrap()).unwrap();

        assert_eq!(index.manifests.len(), 2);
        assert!(dataset.is_pushed_manifest(&index.manifests[0].digest));
        assert!(!dataset.is_pushed_manifest(&index.manifests[1].digest));
        assert_eq!(
            index.manifests[1].platform.as_ref().unwrap().architecture,
            "ppc64le"
        );
    }

    #[test]
    fn test_artifact_with_subject_registers_referrers() {
        let dataset = DataShape::ArtifactWithSubject.generate(Some(7)).unwrap();
        let subject = dataset.manifest_order()[0].clone();
        let referrers = dataset.referrers(&subject);

        assert_eq!(referrers.len(), 2);
        assert_eq!(dataset.artifact_type(&referrers[0]).as_deref(), Some(SIGNATURE_TYPE));
        assert_eq!(dataset.artifact_type(&referrers[1]).as_deref(), Some(ARTIFACT_TYPE));
        assert!(dataset.is_index(&referrers[1]));
        assert!(dataset.tag().is_none());
    }

    #[test]
    fn test_missing_subject_is_external() {
        let dataset = DataShape::ArtifactWithMissingSubject.generate(Some(9)).unwrap();
        let artifact = dataset.manifest_order().last().unwrap();
        let manifest: Manifest = serde_json::from_slice(dataset.manifest(artifact).unwrap()).unwrap();
        let subject = manifest.subject.unwrap().digest;

        assert!(dataset.blob(&subject).is_none());
        assert!(dataset.manifest(&subject).is_none());
        assert_eq!(dataset.referrers(&subject), std::slice::from_ref(artifact));
        assert_eq!(manifest.artifact_type.as_deref(), Some(ARTIFACT_TYPE));
    }

    #[test]
    fn test_nested_index_pushes_inner_before_outer() {
        let dataset = DataShape::NestedIndex.generate(Some(11)).unwrap();
        let order = dataset.manifest_order();
        assert_eq!(order.len(), 4);
        assert!(dataset.is_index(&order[2]));
        assert!(dataset.is_index(&order[3]));
        assert_eq!(dataset.tagged(), Some(&order[3]));
    }

    #[test]
    fn test_seeded_generation_is_reproducible() {
        let a = DataShape::Index.generate(Some(42)).unwrap();
        let b = DataShape::Index.generate(Some(42)).unwrap();
        assert_eq!(a.manifest_order(), b.manifest_order());
    }
}
