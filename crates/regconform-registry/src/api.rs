//! The HTTP exchange seam between the protocol checks and a registry.
//!
//! [`RegistryApi`] performs one request/response round trip. The reqwest
//! [`RegistryClient`](crate::RegistryClient) implements it over the network;
//! an in-process registry can implement it directly.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;

use crate::error::RegistryError;

/// Header names used by the distribution protocol, lowercased.
pub mod headers {
    /// `Accept`.
    pub const ACCEPT: &str = "accept";
    /// `Content-Type`.
    pub const CONTENT_TYPE: &str = "content-type";
    /// `Content-Length`.
    pub const CONTENT_LENGTH: &str = "content-length";
    /// `Content-Range` on chunk uploads.
    pub const CONTENT_RANGE: &str = "content-range";
    /// `Range` on uploads and ranged fetches.
    pub const RANGE: &str = "range";
    /// `Location`.
    pub const LOCATION: &str = "location";
    /// `Link` pagination.
    pub const LINK: &str = "link";
    /// `Docker-Content-Digest`.
    pub const DOCKER_CONTENT_DIGEST: &str = "docker-content-digest";
    /// `OCI-Subject` on manifest put.
    pub const OCI_SUBJECT: &str = "oci-subject";
    /// `OCI-Filters-Applied` on referrers.
    pub const OCI_FILTERS_APPLIED: &str = "oci-filters-applied";
    /// `Docker-Upload-UUID`.
    pub const UPLOAD_UUID: &str = "docker-upload-uuid";
}

/// HTTP methods used by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET.
    Get,
    /// HEAD.
    Head,
    /// POST.
    Post,
    /// PUT.
    Put,
    /// PATCH.
    Patch,
    /// DELETE.
    Delete,
}

impl Method {
    /// Returns the method token.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to the registry.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: Method,
    /// Path with query (`/v2/...`) or an absolute URL from a `Location` header.
    pub target: String,
    /// Request headers, lowercased names.
    pub headers: Vec<(&'static str, String)>,
    /// Request body.
    pub body: Vec<u8>,
}

impl ApiRequest {
    /// Creates a bodiless request.
    #[must_use]
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    /// Attaches a body.
    #[must_use]
    pub fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Looks up a request header.
    #[must_use]
    pub fn header_value(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A response from the registry.
#[derive(Debug, Clone, Default)]
pub struct ApiResponse {
    /// Status code.
    pub status: u16,
    /// Response headers, lowercased names. Repeated headers are joined with `, `.
    pub headers: BTreeMap<String, String>,
    /// Response body.
    pub body: Vec<u8>,
}

impl ApiResponse {
    /// Creates an empty response with the given status.
    #[must_use]
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    /// Attaches a body.
    #[must_use]
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Looks up a response header.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

/// One request/response round trip against a registry.
#[async_trait]
pub trait RegistryApi: Send + Sync {
    /// Sends `request` and returns the raw response.
    ///
    /// Any status code is a successful exchange; interpreting it is the
    /// caller's job.
    ///
    /// # Errors
    ///
    /// Returns a transport-class [`RegistryError`] when no response was
    /// received.
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, RegistryError>;
}
