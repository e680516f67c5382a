//! OCI image and distribution document types.
//!
//! These mirror the OCI image specification closely enough that the bytes
//! produced by serializing them are what a registry receives.

use std::collections::BTreeMap;

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::digest::Digest;

/// OCI media type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MediaType(String);

impl MediaType {
    /// OCI image manifest.
    pub const OCI_MANIFEST: &'static str = "application/vnd.oci.image.manifest.v1+json";

    /// OCI image index.
    pub const OCI_INDEX: &'static str = "application/vnd.oci.image.index.v1+json";

    /// OCI image configuration.
    pub const OCI_CONFIG: &'static str = "application/vnd.oci.image.config.v1+json";

    /// Uncompressed tar layer.
    pub const OCI_LAYER_TAR: &'static str = "application/vnd.oci.image.layer.v1.tar";

    /// Gzip compressed tar layer.
    pub const OCI_LAYER_TAR_GZIP: &'static str = "application/vnd.oci.image.layer.v1.tar+gzip";

    /// The empty JSON descriptor payload (`{}`).
    pub const OCI_EMPTY: &'static str = "application/vnd.oci.empty.v1+json";

    /// Opaque binary content.
    pub const OCTET_STREAM: &'static str = "application/octet-stream";

    /// Creates a new media type.
    #[must_use]
    pub fn new(media_type: impl Into<String>) -> Self {
        Self(media_type.into())
    }

    /// Returns the media type string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// OCI image manifest media type.
    #[must_use]
    pub fn manifest() -> Self {
        Self::new(Self::OCI_MANIFEST)
    }

    /// OCI image index media type.
    #[must_use]
    pub fn index() -> Self {
        Self::new(Self::OCI_INDEX)
    }

    /// Returns true for the manifest and index media types.
    #[must_use]
    pub fn is_manifest_like(&self) -> bool {
        self.0 == Self::OCI_MANIFEST || self.0 == Self::OCI_INDEX
    }
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MediaType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl Serialize for MediaType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for MediaType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(Self(s))
    }
}

/// Target platform of an image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Platform {
    /// CPU architecture (e.g. `amd64`).
    pub architecture: String,

    /// Operating system (e.g. `linux`).
    pub os: String,

    /// Optional CPU variant (e.g. `v8`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl Platform {
    /// Creates a platform.
    #[must_use]
    pub fn new(os: impl Into<String>, architecture: impl Into<String>) -> Self {
        Self {
            architecture: architecture.into(),
            os: os.into(),
            variant: None,
        }
    }

    /// Sets the CPU variant.
    #[must_use]
    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    /// `linux/amd64`.
    #[must_use]
    pub fn linux_amd64() -> Self {
        Self::new("linux", "amd64")
    }

    /// `linux/arm64/v8`.
    #[must_use]
    pub fn linux_arm64() -> Self {
        Self::new("linux", "arm64").with_variant("v8")
    }

    /// `linux/ppc64le`.
    #[must_use]
    pub fn linux_ppc64le() -> Self {
        Self::new("linux", "ppc64le")
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.os, self.architecture)?;
        if let Some(variant) = &self.variant {
            write!(f, "/{variant}")?;
        }
        Ok(())
    }
}

/// OCI content descriptor.
///
/// A descriptor describes the disposition of targeted content. It includes
/// the type of the content, a content identifier (digest), and the byte-size
/// of the raw content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    /// Media type of the referenced content.
    pub media_type: MediaType,

    /// Digest of the targeted content.
    pub digest: Digest,

    /// Size in bytes of the content.
    pub size: u64,

    /// Base64 encoded copy of the content, for small inlined blobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,

    /// Platform of the referenced manifest (index entries only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,

    /// Artifact type of the referenced manifest (referrers responses).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,

    /// Optional annotations (key-value metadata).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl Descriptor {
    /// Creates a new descriptor.
    ///
    /// # Examples
    ///
    /// ```
    /// use regconform_core::{Descriptor, Digest, MediaType};
    ///
    /// let desc = Descriptor::new(
    ///     MediaType::new(MediaType::OCTET_STREAM),
    ///     Digest::canonical(b"hello"),
    ///     5,
    /// );
    /// assert!(desc.data.is_none());
    /// ```
    #[must_use]
    pub const fn new(media_type: MediaType, digest: Digest, size: u64) -> Self {
        Self {
            media_type,
            digest,
            size,
            data: None,
            platform: None,
            artifact_type: None,
            annotations: None,
        }
    }

    /// Creates a descriptor sized to `bytes`.
    #[must_use]
    pub fn for_bytes(media_type: MediaType, digest: Digest, bytes: &[u8]) -> Self {
        Self::new(media_type, digest, bytes.len() as u64)
    }

    /// Inlines `bytes` into the `data` field.
    #[must_use]
    pub fn with_data(mut self, bytes: &[u8]) -> Self {
        self.data = Some(base64::engine::general_purpose::STANDARD.encode(bytes));
        self
    }

    /// Sets the platform.
    #[must_use]
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Sets the artifact type.
    #[must_use]
    pub fn with_artifact_type(mut self, artifact_type: impl Into<String>) -> Self {
        self.artifact_type = Some(artifact_type.into());
        self
    }

    /// Adds an annotation to the descriptor.
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Decodes the inlined data, if any.
    #[must_use]
    pub fn inline_bytes(&self) -> Option<Vec<u8>> {
        self.data
            .as_ref()
            .and_then(|d| base64::engine::general_purpose::STANDARD.decode(d).ok())
    }

    /// Returns a copy without the fields that only make sense inside an index
    /// or in a referrers response.
    #[must_use]
    pub fn stripped(&self) -> Self {
        Self {
            media_type: self.media_type.clone(),
            digest: self.digest.clone(),
            size: self.size,
            data: None,
            platform: None,
            artifact_type: None,
            annotations: None,
        }
    }
}

/// OCI image manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    /// Schema version (always 2).
    pub schema_version: u32,

    /// Media type of this manifest.
    pub media_type: MediaType,

    /// Artifact type (OCI 1.1+).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,

    /// Configuration descriptor.
    pub config: Descriptor,

    /// Layers in order.
    pub layers: Vec<Descriptor>,

    /// Subject for the referrers API (OCI 1.1+).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<Descriptor>,

    /// Optional annotations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl Manifest {
    /// Creates an image manifest.
    #[must_use]
    pub fn new(config: Descriptor, layers: Vec<Descriptor>) -> Self {
        Self {
            schema_version: 2,
            media_type: MediaType::manifest(),
            artifact_type: None,
            config,
            layers,
            subject: None,
            annotations: None,
        }
    }

    /// Every digest this manifest references (config, layers, subject).
    pub fn references(&self) -> impl Iterator<Item = &Digest> {
        std::iter::once(&self.config.digest)
            .chain(self.layers.iter().map(|l| &l.digest))
            .chain(self.subject.iter().map(|s| &s.digest))
    }
}

/// OCI image index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    /// Schema version (always 2).
    pub schema_version: u32,

    /// Media type of this index.
    pub media_type: MediaType,

    /// Artifact type (OCI 1.1+).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_type: Option<String>,

    /// Referenced manifests, each carrying its platform.
    pub manifests: Vec<Descriptor>,

    /// Subject for the referrers API (OCI 1.1+).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<Descriptor>,

    /// Optional annotations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl Index {
    /// Creates an image index.
    #[must_use]
    pub fn new(manifests: Vec<Descriptor>) -> Self {
        Self {
            schema_version: 2,
            media_type: MediaType::index(),
            artifact_type: None,
            manifests,
            subject: None,
            annotations: None,
        }
    }

    /// Every digest this index references (child manifests, subject).
    pub fn references(&self) -> impl Iterator<Item = &Digest> {
        self.manifests
            .iter()
            .map(|m| &m.digest)
            .chain(self.subject.iter().map(|s| &s.digest))
    }
}

/// Root filesystem section of an image configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootFs {
    /// Always `layers`.
    #[serde(rename = "type")]
    pub kind: String,

    /// Uncompressed layer digests in layer order.
    pub diff_ids: Vec<Digest>,
}

/// Minimal OCI image configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
    /// CPU architecture.
    pub architecture: String,

    /// Operating system.
    pub os: String,

    /// CPU variant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,

    /// Execution parameters (left empty).
    pub config: BTreeMap<String, serde_json::Value>,

    /// Layer diff ids.
    pub rootfs: RootFs,
}

impl ImageConfig {
    /// Creates a configuration for `platform` over the given uncompressed layers.
    #[must_use]
    pub fn new(platform: &Platform, diff_ids: Vec<Digest>) -> Self {
        Self {
            architecture: platform.architecture.clone(),
            os: platform.os.clone(),
            variant: platform.variant.clone(),
            config: BTreeMap::new(),
            rootfs: RootFs {
                kind: "layers".to_string(),
                diff_ids,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(content: &[u8]) -> Descriptor {
        Descriptor::for_bytes(
            MediaType::new(MediaType::OCTET_STREAM),
            Digest::canonical(content),
            content,
        )
    }

    #[test]
    fn test_descriptor_inline_data() {
        let d = desc(b"inline me").with_data(b"inline me");
        assert_eq!(d.inline_bytes().unwrap(), b"inline me");
        assert_eq!(d.size, 9);
    }

    #[test]
    fn test_descriptor_serialization_is_camel_case() {
        let d = desc(b"x").with_artifact_type("application/example");
        let json = serde_json::to_string(&d).unwrap();
        assert!(json.contains("mediaType"));
        assert!(json.contains("artifactType"));
        assert!(!json.contains("platform"));
        assert!(!json.contains("\"data\""));
    }

    #[test]
    fn test_manifest_references_in_order() {
        let config = desc(b"config");
        let layers = vec![desc(b"a"), desc(b"b")];
        let mut manifest = Manifest::new(config.clone(), layers.clone());
        manifest.subject = Some(desc(b"subject"));

        let refs: Vec<&Digest> = manifest.references().collect();
        assert_eq!(refs.len(), 4);
        assert_eq!(refs[0], &config.digest);
        assert_eq!(refs[1], &layers[0].digest);
        assert_eq!(refs[2], &layers[1].digest);
    }

    #[test]
    fn test_index_serialization() {
        let child = desc(b"child").with_platform(Platform::linux_arm64());
        let index = Index::new(vec![child]);
        let json = serde_json::to_string(&index).unwrap();
        assert!(json.contains("schemaVersion"));
        assert!(json.contains(r#""variant":"v8""#));
        let parsed: Index = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, index);
    }

    #[test]
    fn test_platform_display() {
        assert_eq!(Platform::linux_amd64().to_string(), "linux/amd64");
        assert_eq!(Platform::linux_arm64().to_string(), "linux/arm64/v8");
    }

    #[test]
    fn test_image_config_serialization() {
        let config = ImageConfig::new(&Platform::linux_amd64(), vec![Digest::canonical(b"l")]);
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains(r#""type":"layers""#));
        assert!(json.contains("diff_ids"));
    }
}
