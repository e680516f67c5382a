//! Outcome severity.
//!
//! [`Status`] is a closed set with an explicit total order. Aggregation
//! anywhere in the engine (result nodes, capability entries, datasets) uses
//! [`Status::merge`], which keeps the more severe of two values.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome of a test step, ordered by severity.
///
/// `Unknown < Disabled < Skip < Pass < Fail < Error`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Nothing has been reported yet.
    #[default]
    Unknown,
    /// Excluded by operator configuration.
    Disabled,
    /// A precondition could not be satisfied.
    Skip,
    /// The registry behaved as the protocol requires.
    Pass,
    /// The registry violated the protocol.
    Fail,
    /// The test engine itself malfunctioned.
    Error,
}

impl Status {
    /// Every status, least severe first.
    pub const ALL: [Self; 6] = [
        Self::Unknown,
        Self::Disabled,
        Self::Skip,
        Self::Pass,
        Self::Fail,
        Self::Error,
    ];

    /// Number of distinct statuses.
    pub const COUNT: usize = Self::ALL.len();

    /// Severity rank used for every comparison.
    ///
    /// Kept independent of declaration order so reordering the variants
    /// cannot change escalation.
    #[must_use]
    pub const fn severity(self) -> u8 {
        match self {
            Self::Unknown => 0,
            Self::Disabled => 1,
            Self::Skip => 2,
            Self::Pass => 3,
            Self::Fail => 4,
            Self::Error => 5,
        }
    }

    /// Dense index for counter arrays.
    #[must_use]
    pub const fn index(self) -> usize {
        self.severity() as usize
    }

    /// Returns the more severe of `self` and `other`.
    #[must_use]
    pub const fn merge(self, other: Self) -> Self {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    /// Returns the lowercase name used in reports.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Disabled => "disabled",
            Self::Skip => "skip",
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Error => "error",
        }
    }

    /// Returns true for statuses that count against conformance.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::Fail | Self::Error)
    }
}

impl PartialOrd for Status {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Status {
    fn cmp(&self, other: &Self) -> Ordering {
        self.severity().cmp(&other.severity())
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown status '{s}'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_order() {
        for pair in Status::ALL.windows(2) {
            assert!(pair[0] < pair[1], "{} should be below {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_merge_keeps_worst() {
        assert_eq!(Status::Pass.merge(Status::Fail), Status::Fail);
        assert_eq!(Status::Fail.merge(Status::Pass), Status::Fail);
        assert_eq!(Status::Disabled.merge(Status::Skip), Status::Skip);
        assert_eq!(Status::Unknown.merge(Status::Disabled), Status::Disabled);
        assert_eq!(Status::Error.merge(Status::Fail), Status::Error);
    }

    #[test]
    fn test_index_is_dense() {
        let indexes: Vec<usize> = Status::ALL.iter().map(|s| s.index()).collect();
        assert_eq!(indexes, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_parse_and_display() {
        for status in Status::ALL {
            assert_eq!(status.to_string().parse::<Status>().unwrap(), status);
        }
        assert!("bogus".parse::<Status>().is_err());
    }

    #[test]
    fn test_serde_lowercase() {
        let json = serde_json::to_string(&Status::Disabled).unwrap();
        assert_eq!(json, r#""disabled""#);
    }
}
