//! Content digests.
//!
//! A [`Digest`] is `<algorithm>:<lowercase hex>` as used on the wire.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha512};

use crate::error::FixtureError;

/// Hash algorithms a registry may be asked to use.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DigestAlgorithm {
    /// SHA-256, the registry-mandated canonical algorithm.
    #[default]
    Sha256,
    /// SHA-512.
    Sha512,
}

impl DigestAlgorithm {
    /// The canonical algorithm every registry must support.
    #[must_use]
    pub const fn canonical() -> Self {
        Self::Sha256
    }

    /// Algorithm prefix used in digest strings.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        }
    }

    /// Length of the hex encoded hash.
    #[must_use]
    pub const fn hex_len(self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Sha512 => 128,
        }
    }

    /// Hashes `data` and returns its digest.
    #[must_use]
    pub fn digest(self, data: &[u8]) -> Digest {
        use sha2::Digest as _;

        let encoded = match self {
            Self::Sha256 => hex::encode(Sha256::digest(data)),
            Self::Sha512 => hex::encode(Sha512::digest(data)),
        };
        Digest {
            algorithm: self,
            encoded,
        }
    }
}

impl FromStr for DigestAlgorithm {
    type Err = FixtureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            other => Err(FixtureError::InvalidDigest {
                value: other.to_string(),
                reason: "unsupported algorithm".to_string(),
            }),
        }
    }
}

/// A content digest, `algorithm:hex`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Digest {
    algorithm: DigestAlgorithm,
    encoded: String,
}

impl Digest {
    /// Computes the canonical digest of `data`.
    #[must_use]
    pub fn canonical(data: &[u8]) -> Self {
        DigestAlgorithm::canonical().digest(data)
    }

    /// Returns the algorithm.
    #[must_use]
    pub const fn algorithm(&self) -> DigestAlgorithm {
        self.algorithm
    }

    /// Returns the hex encoded hash without the algorithm prefix.
    #[must_use]
    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    /// Returns true if `data` hashes to this digest.
    #[must_use]
    pub fn verifies(&self, data: &[u8]) -> bool {
        self.algorithm.digest(data) == *self
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm.as_str(), self.encoded)
    }
}

impl FromStr for Digest {
    type Err = FixtureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| FixtureError::InvalidDigest {
            value: s.to_string(),
            reason: reason.to_string(),
        };

        let (algorithm, encoded) = s.split_once(':').ok_or_else(|| invalid("missing ':'"))?;
        let algorithm: DigestAlgorithm = algorithm.parse()?;
        if encoded.len() != algorithm.hex_len() {
            return Err(invalid("wrong hash length"));
        }
        if !encoded
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(invalid("hash must be lowercase hex"));
        }

        Ok(Self {
            algorithm,
            encoded: encoded.to_string(),
        })
    }
}

impl Serialize for Digest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
