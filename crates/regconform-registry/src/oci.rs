//! Wire types of the OCI distribution API.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Tag list response (`GET /v2/<name>/tags/list`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagList {
    /// Repository name.
    pub name: String,

    /// Tags on this page. Registries may send `null` for an empty repository.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub tags: Vec<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Error response body sent with 4xx statuses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// List of errors.
    pub errors: Vec<ErrorInfo>,
}

impl ErrorResponse {
    /// Creates a body holding a single error.
    #[must_use]
    pub fn single(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            errors: vec![ErrorInfo {
                code: code.as_str().to_string(),
                message: message.into(),
                detail: None,
            }],
        }
    }

    /// Comma-separated list of the error codes.
    #[must_use]
    pub fn codes(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.code.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// A single error entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error code from the published vocabulary.
    pub code: String,

    /// Human-readable message.
    #[serde(default)]
    pub message: String,

    /// Unstructured detail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
}

/// The published error code vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Blob unknown to registry.
    BlobUnknown,
    /// Blob upload invalid.
    BlobUploadInvalid,
    /// Blob upload unknown to registry.
    BlobUploadUnknown,
    /// Provided digest did not match uploaded content.
    DigestInvalid,
    /// Manifest references a manifest or blob unknown to registry.
    ManifestBlobUnknown,
    /// Manifest invalid.
    ManifestInvalid,
    /// Manifest unknown to registry.
    ManifestUnknown,
    /// Invalid repository name.
    NameInvalid,
    /// Repository name not known to registry.
    NameUnknown,
    /// Provided length did not match content length.
    SizeInvalid,
    /// Authentication required.
    Unauthorized,
    /// Requested access to the resource is denied.
    Denied,
    /// The operation is unsupported.
    Unsupported,
    /// Too many requests.
    TooManyRequests,
}

impl ErrorCode {
    /// Every code in the vocabulary.
    pub const ALL: [Self; 14] = [
        Self::BlobUnknown,
        Self::BlobUploadInvalid,
        Self::BlobUploadUnknown,
        Self::DigestInvalid,
        Self::ManifestBlobUnknown,
        Self::ManifestInvalid,
        Self::ManifestUnknown,
        Self::NameInvalid,
        Self::NameUnknown,
        Self::SizeInvalid,
        Self::Unauthorized,
        Self::Denied,
        Self::Unsupported,
        Self::TooManyRequests,
    ];

    /// Wire name of the code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BlobUnknown => "BLOB_UNKNOWN",
            Self::BlobUploadInvalid => "BLOB_UPLOAD_INVALID",
            Self::BlobUploadUnknown => "BLOB_UPLOAD_UNKNOWN",
            Self::DigestInvalid => "DIGEST_INVALID",
            Self::ManifestBlobUnknown => "MANIFEST_BLOB_UNKNOWN",
            Self::ManifestInvalid => "MANIFEST_INVALID",
            Self::ManifestUnknown => "MANIFEST_UNKNOWN",
            Self::NameInvalid => "NAME_INVALID",
            Self::NameUnknown => "NAME_UNKNOWN",
            Self::SizeInvalid => "SIZE_INVALID",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Denied => "DENIED",
            Self::Unsupported => "UNSUPPORTED",
            Self::TooManyRequests => "TOOMANYREQUESTS",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|code| code.as_str() == s)
            .ok_or_else(|| format!("unknown error code: {s}"))
    }
}

/// Checks a 4xx body against the error body contract.
///
/// An empty body is accepted, since HEAD responses and some proxies carry
/// none.
///
/// # Errors
///
/// Returns a description of the violation: undecodable JSON, an empty
/// `errors` array, or a code outside the vocabulary.
pub fn check_error_body(body: &[u8]) -> Result<Option<ErrorResponse>, String> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    let response: ErrorResponse =
        serde_json::from_slice(body).map_err(|e| format!("not an error document: {e}"))?;
    if response.errors.is_empty() {
        return Err("errors array is empty".to_string());
    }
    if let Some(unknown) = response
        .errors
        .iter()
        .find(|e| e.code.parse::<ErrorCode>().is_err())
    {
        return Err(format!("unknown error code {}", unknown.code));
    }
    Ok(Some(response))
}

/// Extracts the `rel="next"` target from a `Link` header.
#[must_use]
pub fn next_link(link: &str) -> Option<String> {
    link.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        let is_next = params
            .split(';')
            .any(|p| p.trim().replace(' ', "") == "rel=\"next\"" || p.trim() == "rel=next");
        let target = target.trim().strip_prefix('<')?.strip_suffix('>')?;
        is_next.then(|| target.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_list_deserialization() {
        let json = r#"{"name": "conformance/one", "tags": ["image", "index"]}"#;
        let tags: TagList = serde_json::from_str(json).unwrap();
        assert_eq!(tags.name, "conformance/one");
        assert_eq!(tags.tags, vec!["image", "index"]);
    }

    #[test]
    fn test_tag_list_null_tags() {
        let tags: TagList = serde_json::from_str(r#"{"name": "a", "tags": null}"#).unwrap();
        assert!(tags.tags.is_empty());
    }

    #[test]
    fn test_error_code_round_trip() {
        for code in ErrorCode::ALL {
            assert_eq!(code.as_str().parse::<ErrorCode>().unwrap(), code);
        }
    }

    #[test]
    fn test_check_error_body_valid() {
        let body = br#"{"errors":[{"code":"MANIFEST_UNKNOWN","message":"manifest unknown","detail":{"tag":"x"}}]}"#;
        let response = check_error_body(body).unwrap().unwrap();
        assert_eq!(response.codes(), "MANIFEST_UNKNOWN");
    }

    #[test]
    fn test_check_error_body_rejects_unknown_code() {
        let body = br#"{"errors":[{"code":"NOT_A_CODE","message":"x"}]}"#;
        let err = check_error_body(body).unwrap_err();
        assert!(err.contains("NOT_A_CODE"));
    }

    #[test]
    fn test_check_error_body_rejects_plain_text() {
        assert!(check_error_body(b"404 page not found").is_err());
        assert!(check_error_body(br#"{"errors":[]}"#).is_err());
        assert!(check_error_body(b"").unwrap().is_none());
    }

    #[test]
    fn test_next_link() {
        let link = r#"</v2/a/tags/list?n=2&last=b>; rel="next""#;
        assert_eq!(next_link(link).as_deref(), Some("/v2/a/tags/list?n=2&last=b"));
        assert_eq!(next_link(r#"</v2/a/tags/list>; rel="prev""#), None);
    }
}
