//! Capability matrix.
//!
//! The matrix tracks, for every protocol operation the engine exercises,
//! whether the operator enabled it and the worst status observed for it so
//! far. Entries only ever escalate: an operation that fails once stays
//! failed for the rest of the run.

use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::CapabilityError;
use crate::status::Status;

/// Operator toggles for groups of protocol operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct ApiToggles {
    /// Blob and manifest uploads.
    pub push: bool,
    /// Blob and manifest downloads.
    pub pull: bool,
    /// Tag listing.
    pub tags: bool,
    /// Referrers API.
    pub referrer: bool,
    /// Tag deletion.
    pub delete_tag: bool,
    /// Manifest deletion.
    pub delete_manifest: bool,
    /// Blob deletion.
    pub delete_blob: bool,
}

impl Default for ApiToggles {
    fn default() -> Self {
        Self {
            push: true,
            pull: true,
            tags: true,
            referrer: true,
            delete_tag: true,
            delete_manifest: true,
            delete_blob: true,
        }
    }
}

impl ApiToggles {
    /// Everything enabled.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Returns whether the toggle gating `capability` is on.
    #[must_use]
    pub const fn allows(&self, capability: Capability) -> bool {
        match capability.toggle() {
            Toggle::Push => self.push,
            Toggle::Pull => self.pull,
            Toggle::Tags => self.tags,
            Toggle::Referrer => self.referrer,
            Toggle::DeleteTag => self.delete_tag,
            Toggle::DeleteManifest => self.delete_manifest,
            Toggle::DeleteBlob => self.delete_blob,
        }
    }
}

/// Configuration switch that gates a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    /// `push`
    Push,
    /// `pull`
    Pull,
    /// `tags`
    Tags,
    /// `referrer`
    Referrer,
    /// `delete_tag`
    DeleteTag,
    /// `delete_manifest`
    DeleteManifest,
    /// `delete_blob`
    DeleteBlob,
}

/// Protocol operations the engine can exercise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Capability {
    /// `GET /v2/<name>/tags/list`
    TagList,
    /// `DELETE /v2/<name>/manifests/<tag>`
    TagDelete,
    /// Tag is gone immediately after deletion.
    TagDeleteAtomic,
    /// Any blob upload.
    BlobPush,
    /// Monolithic `POST ?digest=`.
    BlobPostOnly,
    /// `POST` then `PUT ?digest=` with the body.
    BlobPostPut,
    /// `POST`, ranged `PATCH` chunks, `PUT`.
    BlobPatchChunked,
    /// `POST`, one streamed `PATCH`, `PUT`.
    BlobPatchStream,
    /// `POST ?mount=&from=`.
    BlobMountSource,
    /// `POST ?mount=` without a source repository.
    BlobMountAnonymous,
    /// `GET /v2/<name>/blobs/<digest>`
    BlobGetFull,
    /// Ranged `GET` of a blob.
    BlobGetRange,
    /// `HEAD /v2/<name>/blobs/<digest>`
    BlobHead,
    /// `DELETE /v2/<name>/blobs/<digest>`
    BlobDelete,
    /// Blob is gone immediately after deletion.
    BlobDeleteAtomic,
    /// `PUT /v2/<name>/manifests/<digest>`
    ManifestPutDigest,
    /// `PUT /v2/<name>/manifests/<tag>`
    ManifestPutTag,
    /// `PUT` of a manifest carrying a subject.
    ManifestPutSubject,
    /// `GET /v2/<name>/manifests/<digest>`
    ManifestGetDigest,
    /// `GET /v2/<name>/manifests/<tag>`
    ManifestGetTag,
    /// `HEAD /v2/<name>/manifests/<digest>`
    ManifestHeadDigest,
    /// `HEAD /v2/<name>/manifests/<tag>`
    ManifestHeadTag,
    /// `DELETE /v2/<name>/manifests/<digest>`
    ManifestDelete,
    /// Manifest is gone immediately after deletion.
    ManifestDeleteAtomic,
    /// `GET /v2/<name>/referrers/<digest>`
    Referrers,
}

impl Capability {
    /// Every capability in report order.
    pub const ALL: [Self; 25] = [
        Self::TagList,
        Self::TagDelete,
        Self::TagDeleteAtomic,
        Self::BlobPush,
        Self::BlobPostOnly,
        Self::BlobPostPut,
        Self::BlobPatchChunked,
        Self::BlobPatchStream,
        Self::BlobMountSource,
        Self::BlobMountAnonymous,
        Self::BlobGetFull,
        Self::BlobGetRange,
        Self::BlobHead,
        Self::BlobDelete,
        Self::BlobDeleteAtomic,
        Self::ManifestPutDigest,
        Self::ManifestPutTag,
        Self::ManifestPutSubject,
        Self::ManifestGetDigest,
        Self::ManifestGetTag,
        Self::ManifestHeadDigest,
        Self::ManifestHeadTag,
        Self::ManifestDelete,
        Self::ManifestDeleteAtomic,
        Self::Referrers,
    ];

    /// Number of capabilities.
    pub const COUNT: usize = Self::ALL.len();

    /// Upload strategies the runner rotates through.
    pub const UPLOAD_STRATEGIES: [Self; 4] = [
        Self::BlobPostOnly,
        Self::BlobPostPut,
        Self::BlobPatchChunked,
        Self::BlobPatchStream,
    ];

    /// Stable name used in reports and errors.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::TagList => "tag-list",
            Self::TagDelete => "tag-delete",
            Self::TagDeleteAtomic => "tag-delete-atomic",
            Self::BlobPush => "blob-push",
            Self::BlobPostOnly => "blob-post-only",
            Self::BlobPostPut => "blob-post-put",
            Self::BlobPatchChunked => "blob-patch-chunked",
            Self::BlobPatchStream => "blob-patch-stream",
            Self::BlobMountSource => "blob-mount-source",
            Self::BlobMountAnonymous => "blob-mount-anonymous",
            Self::BlobGetFull => "blob-get-full",
            Self::BlobGetRange => "blob-get-range",
            Self::BlobHead => "blob-head",
            Self::BlobDelete => "blob-delete",
            Self::BlobDeleteAtomic => "blob-delete-atomic",
            Self::ManifestPutDigest => "manifest-put-digest",
            Self::ManifestPutTag => "manifest-put-tag",
            Self::ManifestPutSubject => "manifest-put-subject",
            Self::ManifestGetDigest => "manifest-get-digest",
            Self::ManifestGetTag => "manifest-get-tag",
            Self::ManifestHeadDigest => "manifest-head-digest",
            Self::ManifestHeadTag => "manifest-head-tag",
            Self::ManifestDelete => "manifest-delete",
            Self::ManifestDeleteAtomic => "manifest-delete-atomic",
            Self::Referrers => "referrers",
        }
    }

    /// The configuration switch that gates this capability.
    #[must_use]
    pub const fn toggle(self) -> Toggle {
        match self {
            Self::TagList => Toggle::Tags,
            Self::TagDelete | Self::TagDeleteAtomic => Toggle::DeleteTag,
            Self::BlobPush
            | Self::BlobPostOnly
            | Self::BlobPostPut
            | Self::BlobPatchChunked
            | Self::BlobPatchStream
            | Self::BlobMountSource
            | Self::BlobMountAnonymous
            | Self::ManifestPutDigest
            | Self::ManifestPutTag
            | Self::ManifestPutSubject => Toggle::Push,
            Self::BlobGetFull
            | Self::BlobGetRange
            | Self::BlobHead
            | Self::ManifestGetDigest
            | Self::ManifestGetTag
            | Self::ManifestHeadDigest
            | Self::ManifestHeadTag => Toggle::Pull,
            Self::BlobDelete | Self::BlobDeleteAtomic => Toggle::DeleteBlob,
            Self::ManifestDelete | Self::ManifestDeleteAtomic => Toggle::DeleteManifest,
            Self::Referrers => Toggle::Referrer,
        }
    }

    const fn slot(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Capability {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| format!("unknown capability '{s}'"))
    }
}

impl Serialize for Capability {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Capability {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Worst observed status per capability, plus the operator's toggles.
///
/// Owned by one runner and shared by reference with every test step. Each
/// escalation is a single locked read-modify-write, so concurrent datasets
/// can report on the same operation safely.
#[derive(Debug)]
pub struct CapabilityMatrix {
    toggles: ApiToggles,
    entries: Mutex<[Status; Capability::COUNT]>,
}

impl CapabilityMatrix {
    /// Creates a matrix with every entry `Unknown`.
    #[must_use]
    pub fn new(toggles: ApiToggles) -> Self {
        Self {
            toggles,
            entries: Mutex::new([Status::Unknown; Capability::COUNT]),
        }
    }

    /// Returns the toggles the matrix was built with.
    #[must_use]
    pub const fn toggles(&self) -> &ApiToggles {
        &self.toggles
    }

    /// Returns whether `capability` is enabled by configuration.
    #[must_use]
    pub const fn is_enabled(&self, capability: Capability) -> bool {
        self.toggles.allows(capability)
    }

    /// Checks that every listed operation is enabled.
    ///
    /// # Errors
    ///
    /// Returns one [`CapabilityError::Disabled`] naming every disabled
    /// operation among `capabilities`. Callers record this as Disabled and
    /// carry on.
    pub fn require(&self, capabilities: &[Capability]) -> Result<(), CapabilityError> {
        let disabled: Vec<Capability> = capabilities
            .iter()
            .copied()
            .filter(|c| !self.is_enabled(*c))
            .collect();

        if disabled.is_empty() {
            Ok(())
        } else {
            Err(CapabilityError::Disabled {
                operations: disabled,
            })
        }
    }

    /// Escalates `capability` to at least `status` and returns the new entry.
    pub fn escalate(&self, capability: Capability, status: Status) -> Status {
        let mut entries = self.entries.lock();
        let slot = &mut entries[capability.slot()];
        *slot = slot.merge(status);
        *slot
    }

    /// Records a pass.
    pub fn pass(&self, capability: Capability) {
        self.escalate(capability, Status::Pass);
    }

    /// Records a protocol failure.
    pub fn fail(&self, capability: Capability) {
        self.escalate(capability, Status::Fail);
    }

    /// Records an unsatisfied precondition.
    pub fn skip(&self, capability: Capability) {
        self.escalate(capability, Status::Skip);
    }

    /// Records that configuration disabled the operation.
    pub fn disabled(&self, capability: Capability) {
        self.escalate(capability, Status::Disabled);
    }

    /// Records an engine error while exercising the operation.
    pub fn error(&self, capability: Capability) {
        self.escalate(capability, Status::Error);
    }

    /// Current entry for `capability`.
    #[must_use]
    pub fn status(&self, capability: Capability) -> Status {
        self.entries.lock()[capability.slot()]
    }

    /// Snapshot of every entry in report order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(Capability, Status)> {
        let entries = self.entries.lock();
        Capability::ALL
            .into_iter()
            .map(|c| (c, entries[c.slot()]))
            .collect()
    }
}

impl Default for CapabilityMatrix {
    fn default() -> Self {
        Self::new(ApiToggles::default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_slots_match_report_order() {
        for (i, c) in Capability::ALL.iter().enumerate() {
            assert_eq!(c.slot(), i, "{c} out of order");
        }
    }

    #[test]
    fn test_names_are_unique_and_parse() {
        let mut names: Vec<&str> = Capability::ALL.iter().map(|c| c.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Capability::COUNT);

        for c in Capability::ALL {
            assert_eq!(c.name().parse::<Capability>().unwrap(), c);
        }
    }

    #[test]
    fn test_worst_status_persists() {
        let matrix = CapabilityMatrix::default();
        matrix.pass(Capability::BlobPostOnly);
        matrix.fail(Capability::BlobPostOnly);
        matrix.pass(Capability::BlobPostOnly);
        assert_eq!(matrix.status(Capability::BlobPostOnly), Status::Fail);
    }

    #[test]
    fn test_escalation_ignores_lower_status() {
        let matrix = CapabilityMatrix::default();
        matrix.pass(Capability::Referrers);
        matrix.skip(Capability::Referrers);
        matrix.disabled(Capability::Referrers);
        assert_eq!(matrix.status(Capability::Referrers), Status::Pass);
        matrix.error(Capability::Referrers);
        assert_eq!(matrix.status(Capability::Referrers), Status::Error);
    }

    #[test]
    fn test_require_names_every_disabled_operation() {
        let toggles = ApiToggles {
            delete_blob: false,
            delete_manifest: false,
            ..ApiToggles::default()
        };
        let matrix = CapabilityMatrix::new(toggles);

        assert!(matrix
            .require(&[Capability::BlobPostOnly, Capability::ManifestGetDigest])
            .is_ok());

        let err = matrix
            .require(&[
                Capability::BlobDelete,
                Capability::BlobHead,
                Capability::ManifestDelete,
            ])
            .unwrap_err();
        assert_eq!(
            err,
            CapabilityError::Disabled {
                operations: vec![Capability::BlobDelete, Capability::ManifestDelete]
            }
        );
    }

    #[test]
    fn test_toggle_mapping() {
        let toggles = ApiToggles {
            push: false,
            ..ApiToggles::default()
        };
        assert!(!toggles.allows(Capability::BlobMountAnonymous));
        assert!(!toggles.allows(Capability::ManifestPutSubject));
        assert!(toggles.allows(Capability::BlobGetRange));
        assert!(toggles.allows(Capability::TagList));
    }

    #[test]
    fn test_concurrent_escalation() {
        let matrix = Arc::new(CapabilityMatrix::default());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let matrix = Arc::clone(&matrix);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        if i == 3 {
                            matrix.fail(Capability::BlobHead);
                        } else {
                            matrix.pass(Capability::BlobHead);
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(matrix.status(Capability::BlobHead), Status::Fail);
    }

    #[test]
    fn test_snapshot_covers_every_capability() {
        let matrix = CapabilityMatrix::default();
        matrix.pass(Capability::TagList);
        let snapshot = matrix.snapshot();
        assert_eq!(snapshot.len(), Capability::COUNT);
        assert_eq!(snapshot[0], (Capability::TagList, Status::Pass));
        assert!(snapshot[1..].iter().all(|(_, s)| *s == Status::Unknown));
    }
}
