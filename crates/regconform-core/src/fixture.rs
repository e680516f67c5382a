//! Fixture graph generation.
//!
//! A [`FixtureBuilder`] synthesizes blobs, configs, manifests and indices
//! entirely in memory. Every generator only ever adds to the graph; nothing
//! already generated is rewritten. [`FixtureBuilder::build`] freezes the
//! graph into a read-only [`Dataset`] that the runner pushes.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Write as FmtWrite;
use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use tracing::debug;

use crate::digest::{Digest, DigestAlgorithm};
use crate::error::{FixtureError, Result};
use crate::oci::{Descriptor, ImageConfig, Index, Manifest, MediaType, Platform};

/// Options accepted by every generator.
///
/// Fields that do not apply to a generator are ignored by it.
#[derive(Debug, Clone)]
pub struct GenOptions {
    /// Hash algorithm for the generated content.
    pub algorithm: DigestAlgorithm,

    /// Media type to declare instead of the generator's default.
    pub media_type: Option<MediaType>,

    /// Copy blob bytes into the descriptor `data` field.
    pub inline_data: bool,

    /// Gzip layers (`gen_layer` only).
    pub compress: bool,

    /// Artifact type for manifests and indices.
    pub artifact_type: Option<String>,

    /// Subject descriptor for manifests and indices.
    pub subject: Option<Descriptor>,

    /// Annotations for manifests and indices.
    pub annotations: BTreeMap<String, String>,

    /// Describe the manifest without scheduling it for push.
    ///
    /// Used for the children of a sparse index.
    pub detached: bool,
}

impl Default for GenOptions {
    fn default() -> Self {
        Self {
            algorithm: DigestAlgorithm::canonical(),
            media_type: None,
            inline_data: false,
            compress: true,
            artifact_type: None,
            subject: None,
            annotations: BTreeMap::new(),
            detached: false,
        }
    }
}

impl GenOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the hash algorithm.
    #[must_use]
    pub const fn with_algorithm(mut self, algorithm: DigestAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Sets the declared media type.
    #[must_use]
    pub fn with_media_type(mut self, media_type: impl Into<String>) -> Self {
        self.media_type = Some(MediaType::new(media_type));
        self
    }

    /// Inlines blob bytes into descriptors.
    #[must_use]
    pub const fn with_inline_data(mut self, inline: bool) -> Self {
        self.inline_data = inline;
        self
    }

    /// Enables or disables layer compression.
    #[must_use]
    pub const fn with_compress(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Sets the artifact type.
    #[must_use]
    pub fn with_artifact_type(mut self, artifact_type: impl Into<String>) -> Self {
        self.artifact_type = Some(artifact_type.into());
        self
    }

    /// Sets the subject.
    #[must_use]
    pub fn with_subject(mut self, subject: Descriptor) -> Self {
        self.subject = Some(subject);
        self
    }

    /// Adds an annotation.
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Marks the manifest as described but not pushed.
    #[must_use]
    pub const fn detached(mut self) -> Self {
        self.detached = true;
        self
    }

    fn annotations(&self) -> Option<BTreeMap<String, String>> {
        (!self.annotations.is_empty()).then(|| self.annotations.clone())
    }
}

/// Builds one fixture graph.
///
/// # Examples
///
/// ```rust
/// use regconform_core::{FixtureBuilder, GenOptions};
///
/// let mut builder = FixtureBuilder::new("blobs");
/// let (digest, bytes) = builder.gen_blob(1024, &GenOptions::default()).unwrap();
/// assert!(digest.verifies(&bytes));
/// ```
#[derive(Debug)]
pub struct FixtureBuilder {
    graph: Dataset,
    rng: StdRng,
}

impl FixtureBuilder {
    /// Creates a builder with randomly seeded content.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            graph: Dataset::empty(name.into()),
            rng: StdRng::from_entropy(),
        }
    }

    /// Creates a builder whose random content is reproducible.
    #[must_use]
    pub fn with_seed(name: impl Into<String>, seed: u64) -> Self {
        Self {
            graph: Dataset::empty(name.into()),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Returns the dataset name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.graph.name
    }

    /// Returns the registered descriptor for `digest`.
    #[must_use]
    pub fn descriptor(&self, digest: &Digest) -> Option<&Descriptor> {
        self.graph.descriptors.get(digest)
    }

    /// Returns the referrers registered so far for `subject`.
    #[must_use]
    pub fn referrers(&self, subject: &Digest) -> &[Digest] {
        self.graph.referrers(subject)
    }

    /// Records `bytes` as a blob and returns its digest.
    ///
    /// Adding identical bytes twice is a no-op that returns the same digest.
    ///
    /// # Errors
    ///
    /// Never fails today; the signature matches the other generators.
    pub fn add_blob(&mut self, bytes: Vec<u8>, opts: &GenOptions) -> Result<Digest> {
        let digest = opts.algorithm.digest(&bytes);
        if self.graph.blobs.contains_key(&digest) {
            return Ok(digest);
        }

        let media_type = opts
            .media_type
            .clone()
            .unwrap_or_else(|| MediaType::new(MediaType::OCTET_STREAM));
        let mut descriptor = Descriptor::for_bytes(media_type, digest.clone(), &bytes);
        if opts.inline_data {
            descriptor = descriptor.with_data(&bytes);
        }

        debug!(dataset = %self.graph.name, digest = %digest, size = bytes.len(), "Added blob");

        self.graph.register(descriptor);
        self.graph.blob_order.push(digest.clone());
        self.graph.blobs.insert(digest.clone(), bytes);
        Ok(digest)
    }

    /// Generates `size` random bytes and records them as a blob.
    ///
    /// # Errors
    ///
    /// Propagates [`FixtureBuilder::add_blob`] errors.
    pub fn gen_blob(&mut self, size: usize, opts: &GenOptions) -> Result<(Digest, Vec<u8>)> {
        let mut bytes = vec![0u8; size];
        self.rng.fill_bytes(&mut bytes);
        let digest = self.add_blob(bytes.clone(), opts)?;
        Ok((digest, bytes))
    }

    /// Describes random content that is never added to the graph.
    ///
    /// Used for references that must not resolve, such as a missing subject.
    #[must_use]
    pub fn gen_external(&mut self, size: usize, media_type: MediaType, opts: &GenOptions) -> Descriptor {
        let mut bytes = vec![0u8; size];
        self.rng.fill_bytes(&mut bytes);
        let digest = opts.algorithm.digest(&bytes);
        Descriptor::for_bytes(media_type, digest, &bytes)
    }

    /// Generates a single-file tar layer.
    ///
    /// Returns the pushable (compressed) digest, the uncompressed digest that
    /// configs reference, and the pushable bytes. Without compression the two
    /// digests are equal.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::Archive`] if the archive cannot be written.
    pub fn gen_layer(&mut self, index: usize, opts: &GenOptions) -> Result<(Digest, Digest, Vec<u8>)> {
        let text = self.random_text(index);
        let tarball = build_tar(&format!("layer-{index}.txt"), text.as_bytes())?;

        if !opts.compress {
            let mut layer_opts = opts.clone();
            layer_opts
                .media_type
                .get_or_insert_with(|| MediaType::new(MediaType::OCI_LAYER_TAR));
            let digest = self.add_blob(tarball.clone(), &layer_opts)?;
            return Ok((digest.clone(), digest, tarball));
        }

        let uncompressed = opts.algorithm.digest(&tarball);
        self.graph.register(Descriptor::for_bytes(
            MediaType::new(MediaType::OCI_LAYER_TAR),
            uncompressed.clone(),
            &tarball,
        ));

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&tarball)?;
        let compressed = encoder.finish()?;

        let mut layer_opts = opts.clone();
        layer_opts
            .media_type
            .get_or_insert_with(|| MediaType::new(MediaType::OCI_LAYER_TAR_GZIP));
        let digest = self.add_blob(compressed.clone(), &layer_opts)?;

        Ok((digest, uncompressed, compressed))
    }

    /// Serializes an image configuration and records it as a blob.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::Serialization`] if the config cannot be encoded.
    pub fn gen_config(
        &mut self,
        platform: &Platform,
        diff_ids: &[Digest],
        opts: &GenOptions,
    ) -> Result<(Digest, Vec<u8>)> {
        let config = ImageConfig::new(platform, diff_ids.to_vec());
        let bytes = serde_json::to_vec(&config)?;

        let mut config_opts = opts.clone();
        config_opts
            .media_type
            .get_or_insert_with(|| MediaType::new(MediaType::OCI_CONFIG));
        let digest = self.add_blob(bytes.clone(), &config_opts)?;
        Ok((digest, bytes))
    }

    /// Records the OCI empty config (`{}`) used by artifacts.
    ///
    /// # Errors
    ///
    /// Propagates [`FixtureBuilder::add_blob`] errors.
    pub fn gen_empty_config(&mut self, opts: &GenOptions) -> Result<Digest> {
        let empty_opts = opts
            .clone()
            .with_media_type(MediaType::OCI_EMPTY)
            .with_inline_data(true);
        self.add_blob(b"{}".to_vec(), &empty_opts)
    }

    /// Serializes a manifest over registered config and layer blobs.
    ///
    /// Layer order is preserved exactly. The manifest is appended to the push
    /// order unless `opts.detached`, and to the referrer index when a subject
    /// is set.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::UnknownDigest`] if the config or a layer was
    /// never registered.
    pub fn gen_manifest(
        &mut self,
        config: &Digest,
        layers: &[Digest],
        opts: &GenOptions,
    ) -> Result<(Digest, Vec<u8>)> {
        let config_desc = self.lookup(config)?;
        let layer_descs = layers
            .iter()
            .map(|l| self.lookup(l))
            .collect::<Result<Vec<_>>>()?;

        let mut manifest = Manifest::new(config_desc.clone(), layer_descs);
        manifest.artifact_type.clone_from(&opts.artifact_type);
        manifest.subject = opts.subject.as_ref().map(Descriptor::stripped);
        manifest.annotations = opts.annotations();

        let bytes = serde_json::to_vec(&manifest)?;
        let digest = self.record_manifest(
            MediaType::manifest(),
            bytes.clone(),
            opts.artifact_type.clone(),
            opts,
        );
        Ok((digest, bytes))
    }

    /// Serializes an index pairing each manifest with its platform.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::IndexArity`] when the two lists differ in
    /// length, and [`FixtureError::UnknownDigest`] for an unregistered
    /// manifest. Nothing is registered on error.
    pub fn gen_index(
        &mut self,
        platforms: &[Platform],
        manifests: &[Digest],
        opts: &GenOptions,
    ) -> Result<(Digest, Vec<u8>)> {
        if platforms.len() != manifests.len() {
            return Err(FixtureError::IndexArity {
                platforms: platforms.len(),
                manifests: manifests.len(),
            });
        }

        let entries = manifests
            .iter()
            .zip(platforms)
            .map(|(digest, platform)| {
                let registered = self.lookup(digest)?;
                let mut entry = registered.stripped().with_platform(platform.clone());
                entry.artifact_type.clone_from(&registered.artifact_type);
                Ok(entry)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut index = Index::new(entries);
        index.artifact_type.clone_from(&opts.artifact_type);
        index.subject = opts.subject.as_ref().map(Descriptor::stripped);
        index.annotations = opts.annotations();

        let bytes = serde_json::to_vec(&index)?;
        let digest = self.record_manifest(
            MediaType::index(),
            bytes.clone(),
            opts.artifact_type.clone(),
            opts,
        );
        Ok((digest, bytes))
    }

    /// Tags the last manifest in push order.
    pub fn set_tag(&mut self, tag: impl Into<String>) {
        self.graph.tag = Some(tag.into());
    }

    /// Freezes the graph.
    #[must_use]
    pub fn build(self) -> Dataset {
        self.graph
    }

    fn lookup(&self, digest: &Digest) -> Result<Descriptor> {
        self.graph
            .descriptors
            .get(digest)
            .cloned()
            .ok_or_else(|| FixtureError::UnknownDigest {
                dataset: self.graph.name.clone(),
                digest: digest.to_string(),
            })
    }

    fn record_manifest(
        &mut self,
        media_type: MediaType,
        bytes: Vec<u8>,
        artifact_type: Option<String>,
        opts: &GenOptions,
    ) -> Digest {
        let digest = opts.algorithm.digest(&bytes);
        let mut descriptor = Descriptor::for_bytes(media_type, digest.clone(), &bytes);
        descriptor.artifact_type = artifact_type;
        descriptor.annotations = opts.annotations();

        debug!(
            dataset = %self.graph.name,
            digest = %digest,
            media_type = %descriptor.media_type,
            detached = opts.detached,
            "Generated manifest"
        );

        self.graph.register(descriptor);
        self.graph.manifests.insert(digest.clone(), bytes);
        if !opts.detached {
            self.graph.man_order.push(digest.clone());
        }
        if let Some(subject) = &opts.subject {
            self.graph
                .referrers
                .entry(subject.digest.clone())
                .or_default()
                .push(digest.clone());
        }
        digest
    }

    fn random_text(&mut self, index: usize) -> String {
        let lines = self.rng.gen_range(4..16);
        let mut text = format!("layer {index}\n");
        for line in 0..lines {
            let word: u64 = self.rng.gen();
            let _ = writeln!(text, "{line:04} {word:016x}");
        }
        text
    }
}

fn build_tar(path: &str, contents: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);

    let mut builder = tar::Builder::new(Vec::new());
    builder.append_data(&mut header, path, contents)?;
    builder.into_inner()
}

/// A frozen fixture graph.
///
/// Holds every generated blob and manifest, the dependency-correct push
/// order, an optional tag for the last pushed manifest, and the referrer
/// index.
#[derive(Debug, Clone)]
pub struct Dataset {
    name: String,
    blobs: HashMap<Digest, Vec<u8>>,
    blob_order: Vec<Digest>,
    descriptors: HashMap<Digest, Descriptor>,
    manifests: HashMap<Digest, Vec<u8>>,
    man_order: Vec<Digest>,
    tag: Option<String>,
    referrers: BTreeMap<Digest, Vec<Digest>>,
    sequence: HashMap<Digest, usize>,
}

impl Dataset {
    fn empty(name: String) -> Self {
        Self {
            name,
            blobs: HashMap::new(),
            blob_order: Vec::new(),
            descriptors: HashMap::new(),
            manifests: HashMap::new(),
            man_order: Vec::new(),
            tag: None,
            referrers: BTreeMap::new(),
            sequence: HashMap::new(),
        }
    }

    fn register(&mut self, descriptor: Descriptor) {
        let next = self.sequence.len();
        self.sequence.entry(descriptor.digest.clone()).or_insert(next);
        self.descriptors
            .entry(descriptor.digest.clone())
            .or_insert(descriptor);
    }

    /// Dataset name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Blob digests in generation order.
    #[must_use]
    pub fn blob_order(&self) -> &[Digest] {
        &self.blob_order
    }

    /// Bytes of a blob.
    #[must_use]
    pub fn blob(&self, digest: &Digest) -> Option<&[u8]> {
        self.blobs.get(digest).map(Vec::as_slice)
    }

    /// Iterates blobs in generation order.
    pub fn blobs(&self) -> impl Iterator<Item = (&Digest, &[u8])> {
        self.blob_order
            .iter()
            .filter_map(|d| self.blobs.get(d).map(|b| (d, b.as_slice())))
    }

    /// Registered descriptor for any digest in the graph.
    #[must_use]
    pub fn descriptor(&self, digest: &Digest) -> Option<&Descriptor> {
        self.descriptors.get(digest)
    }

    /// Bytes of a manifest or index.
    #[must_use]
    pub fn manifest(&self, digest: &Digest) -> Option<&[u8]> {
        self.manifests.get(digest).map(Vec::as_slice)
    }

    /// Manifest digests in push order.
    #[must_use]
    pub fn manifest_order(&self) -> &[Digest] {
        &self.man_order
    }

    /// Tag applied to the last manifest in push order.
    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    /// The manifest the tag points at.
    #[must_use]
    pub fn tagged(&self) -> Option<&Digest> {
        self.tag.as_ref().and(self.man_order.last())
    }

    /// Push reference for a manifest: the tag for the tagged entry, else the digest.
    #[must_use]
    pub fn reference_for(&self, digest: &Digest) -> String {
        match (self.tag.as_deref(), self.man_order.last()) {
            (Some(tag), Some(last)) if last == digest => tag.to_string(),
            _ => digest.to_string(),
        }
    }

    /// Digests that declared `subject` as their subject, in generation order.
    #[must_use]
    pub fn referrers(&self, subject: &Digest) -> &[Digest] {
        self.referrers.get(subject).map_or(&[], Vec::as_slice)
    }

    /// Every subject with at least one referrer.
    pub fn subjects(&self) -> impl Iterator<Item = &Digest> {
        self.referrers.keys()
    }

    /// Artifact type a referrers response reports for a stored manifest.
    ///
    /// The explicit `artifactType` when set, otherwise the config media type
    /// of an image manifest.
    #[must_use]
    pub fn artifact_type(&self, digest: &Digest) -> Option<String> {
        let descriptor = self.descriptors.get(digest)?;
        if let Some(artifact_type) = &descriptor.artifact_type {
            return Some(artifact_type.clone());
        }
        if self.is_index(digest) {
            return None;
        }
        let manifest: Manifest = serde_json::from_slice(self.manifests.get(digest)?).ok()?;
        Some(manifest.config.media_type.to_string())
    }

    /// Subject digest declared by a stored manifest or index.
    #[must_use]
    pub fn subject(&self, digest: &Digest) -> Option<Digest> {
        let bytes = self.manifests.get(digest)?;
        if self.is_index(digest) {
            serde_json::from_slice::<Index>(bytes).ok()?.subject.map(|s| s.digest)
        } else {
            serde_json::from_slice::<Manifest>(bytes).ok()?.subject.map(|s| s.digest)
        }
    }

    /// Returns true if the digest is stored as a manifest and scheduled for push.
    #[must_use]
    pub fn is_pushed_manifest(&self, digest: &Digest) -> bool {
        self.man_order.contains(digest)
    }

    /// Returns true if the digest is an index.
    #[must_use]
    pub fn is_index(&self, digest: &Digest) -> bool {
        self.descriptors
            .get(digest)
            .is_some_and(|d| d.media_type.as_str() == MediaType::OCI_INDEX)
    }

    /// Checks that the push order is a topological order of the graph.
    ///
    /// Every stored digest an entry references must have been generated
    /// before it, and a referenced manifest that is pushed must be pushed
    /// earlier. Config and layer references must be stored; a subject may be
    /// external to the graph.
    ///
    /// # Errors
    ///
    /// Returns [`FixtureError::UnknownDigest`] for a missing config, layer or
    /// child manifest, and [`FixtureError::OrderViolation`] for a reference
    /// that comes after its referrer.
    pub fn check_order(&self) -> Result<()> {
        let mut pushed = HashSet::new();

        for entry in &self.man_order {
            let bytes = self.manifests.get(entry).ok_or_else(|| self.unknown(entry))?;
            let (required, subject) = if self.is_index(entry) {
                let index: Index = serde_json::from_slice(bytes)?;
                let children: Vec<Digest> = index.manifests.iter().map(|m| m.digest.clone()).collect();
                (children, index.subject.map(|s| s.digest))
            } else {
                let manifest: Manifest = serde_json::from_slice(bytes)?;
                let mut refs = vec![manifest.config.digest.clone()];
                refs.extend(manifest.layers.iter().map(|l| l.digest.clone()));
                (refs, manifest.subject.map(|s| s.digest))
            };

            for reference in &required {
                if !self.blobs.contains_key(reference) && !self.manifests.contains_key(reference) {
                    return Err(self.unknown(reference));
                }
                self.check_precedes(entry, reference, &pushed)?;
            }
            if let Some(subject) = &subject {
                if self.blobs.contains_key(subject) || self.manifests.contains_key(subject) {
                    self.check_precedes(entry, subject, &pushed)?;
                }
            }

            pushed.insert(entry.clone());
        }

        Ok(())
    }

    fn check_precedes(&self, entry: &Digest, reference: &Digest, pushed: &HashSet<Digest>) -> Result<()> {
        let violation = || FixtureError::OrderViolation {
            entry: entry.to_string(),
            reference: reference.to_string(),
        };

        let entry_seq = self.sequence.get(entry).ok_or_else(violation)?;
        let reference_seq = self.sequence.get(reference).ok_or_else(violation)?;
        if reference_seq >= entry_seq {
            return Err(violation());
        }
        if self.is_pushed_manifest(reference) && !pushed.contains(reference) {
            return Err(violation());
        }
        Ok(())
    }

    fn unknown(&self, digest: &Digest) -> FixtureError {
        FixtureError::UnknownDigest {
            dataset: self.name.clone(),
            digest: digest.to_string(),
        }
    }
}
