//! Distribution protocol operations with their conformance checks.
//!
//! Every method assembles the requests for one protocol operation, sends
//! them through a [`RegistryApi`] and checks the responses against the
//! contract. A contract violation comes back as a protocol-class
//! [`RegistryError`]; the caller decides how to score it.

use std::sync::Arc;

use regconform_core::{Descriptor, Digest, Index, MediaType};
use tracing::debug;

use crate::api::{headers, ApiRequest, ApiResponse, Method, RegistryApi};
use crate::error::RegistryError;
use crate::oci::{check_error_body, next_link, TagList};

const OCTET_STREAM: &str = "application/octet-stream";

/// Upper bound on followed pagination links.
const MAX_PAGES: usize = 1000;

/// How a mount request completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountOutcome {
    /// The registry mounted the blob (201).
    Mounted,
    /// The registry opened an upload session instead (202), which was then
    /// completed with the blob content.
    Fallback,
}

/// A manifest or index to upload.
#[derive(Debug, Clone, Copy)]
pub struct ManifestUpload<'a> {
    /// Digest of `body`.
    pub digest: &'a Digest,
    /// Media type sent as `Content-Type`.
    pub media_type: &'a MediaType,
    /// Serialized document.
    pub body: &'a [u8],
    /// Subject digest the document declares.
    pub subject: Option<&'a Digest>,
}

/// One page of a tag listing.
#[derive(Debug, Clone)]
pub struct TagPage {
    /// Decoded body.
    pub list: TagList,
    /// `rel="next"` link, if the registry sent one.
    pub next: Option<String>,
}

/// A referrers response.
#[derive(Debug, Clone)]
pub struct Referrers {
    /// Descriptors of the referring manifests, across all pages.
    pub manifests: Vec<Descriptor>,
    /// Whether the registry applied the `artifactType` filter.
    pub filtered: bool,
}

/// Protocol driver over a [`RegistryApi`].
#[derive(Clone)]
pub struct Distribution {
    api: Arc<dyn RegistryApi>,
}

impl std::fmt::Debug for Distribution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Distribution").finish_non_exhaustive()
    }
}

impl Distribution {
    /// Wraps an API implementation.
    #[must_use]
    pub fn new(api: Arc<dyn RegistryApi>) -> Self {
        Self { api }
    }

    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, RegistryError> {
        debug!(method = %request.method, target = %request.target, "Registry request");
        self.api.send(request).await
    }

    /// Checks that the registry serves the v2 API (`GET /v2/`).
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnexpectedStatus`] on anything but 200.
    pub async fn ping(&self) -> Result<(), RegistryError> {
        let response = self.send(ApiRequest::new(Method::Get, "/v2/")).await?;
        expect("api version check", &response, &[200])
    }

    /// Pushes a blob with a single `POST ?digest=` carrying the body.
    ///
    /// A 202 reply opens a session, which is completed with a `PUT`.
    ///
    /// # Errors
    ///
    /// Returns a protocol error on any contract violation.
    pub async fn blob_post_only(&self, repo: &str, digest: &Digest, data: &[u8]) -> Result<(), RegistryError> {
        const OP: &str = "blob post-only";
        let request = ApiRequest::new(Method::Post, format!("/v2/{repo}/blobs/uploads/?digest={digest}"))
            .header(headers::CONTENT_TYPE, OCTET_STREAM)
            .body(data.to_vec());
        let response = self.send(request).await?;

        match response.status {
            201 => Ok(()),
            202 => {
                let location = require_header(OP, &response, headers::LOCATION)?.to_string();
                self.commit(OP, &location, digest, data.to_vec()).await
            }
            _ => Err(unexpected(OP, "201 or 202", &response)),
        }
    }

    /// Pushes a blob by opening a session and completing it with one `PUT`.
    ///
    /// # Errors
    ///
    /// Returns a protocol error on any contract violation.
    pub async fn blob_post_put(&self, repo: &str, digest: &Digest, data: &[u8]) -> Result<(), RegistryError> {
        const OP: &str = "blob post-put";
        let location = self.open_session(OP, repo).await?;
        self.commit(OP, &location, digest, data.to_vec()).await
    }

    /// Pushes a blob in `chunk_size` pieces, each sent with `Content-Range`.
    ///
    /// # Errors
    ///
    /// Returns a protocol error on any contract violation.
    pub async fn blob_patch_chunked(
        &self,
        repo: &str,
        digest: &Digest,
        data: &[u8],
        chunk_size: usize,
    ) -> Result<(), RegistryError> {
        const OP: &str = "blob patch-chunked";
        let mut location = self.open_session(OP, repo).await?;

        let mut offset = 0usize;
        for chunk in data.chunks(chunk_size.max(1)) {
            let end = offset + chunk.len() - 1;
            let request = ApiRequest::new(Method::Patch, location.clone())
                .header(headers::CONTENT_TYPE, OCTET_STREAM)
                .header(headers::CONTENT_RANGE, format!("{offset}-{end}"))
                .body(chunk.to_vec());
            let response = self.send(request).await?;
            expect(OP, &response, &[202])?;
            check_range(OP, &response, end)?;
            location = require_header(OP, &response, headers::LOCATION)?.to_string();
            offset = end + 1;
        }

        self.commit(OP, &location, digest, Vec::new()).await
    }

    /// Pushes a blob as a single streamed `PATCH` without `Content-Range`.
    ///
    /// # Errors
    ///
    /// Returns a protocol error on any contract violation.
    pub async fn blob_patch_stream(&self, repo: &str, digest: &Digest, data: &[u8]) -> Result<(), RegistryError> {
        const OP: &str = "blob patch-stream";
        let mut location = self.open_session(OP, repo).await?;

        if !data.is_empty() {
            let request = ApiRequest::new(Method::Patch, location.clone())
                .header(headers::CONTENT_TYPE, OCTET_STREAM)
                .body(data.to_vec());
            let response = self.send(request).await?;
            expect(OP, &response, &[202])?;
            check_range(OP, &response, data.len() - 1)?;
            location = require_header(OP, &response, headers::LOCATION)?.to_string();
        }

        self.commit(OP, &location, digest, Vec::new()).await
    }

    /// Mounts a blob into `repo`, from `from` or anonymously when `None`.
    ///
    /// # Errors
    ///
    /// Returns a protocol error on any contract violation.
    pub async fn blob_mount(
        &self,
        repo: &str,
        digest: &Digest,
        from: Option<&str>,
        data: &[u8],
    ) -> Result<MountOutcome, RegistryError> {
        const OP: &str = "blob mount";
        let target = match from {
            Some(from) => format!("/v2/{repo}/blobs/uploads/?mount={digest}&from={from}"),
            None => format!("/v2/{repo}/blobs/uploads/?mount={digest}"),
        };
        let response = self.send(ApiRequest::new(Method::Post, target)).await?;

        match response.status {
            201 => {
                require_header(OP, &response, headers::LOCATION)?;
                Ok(MountOutcome::Mounted)
            }
            202 => {
                let location = require_header(OP, &response, headers::LOCATION)?.to_string();
                self.commit(OP, &location, digest, data.to_vec()).await?;
                Ok(MountOutcome::Fallback)
            }
            _ => Err(unexpected(OP, "201 or 202", &response)),
        }
    }

    /// Checks a blob's existence with `HEAD`.
    ///
    /// Returns false on 404. A 200 must carry `Content-Length` equal to
    /// `size`.
    ///
    /// # Errors
    ///
    /// Returns a protocol error on any contract violation.
    pub async fn blob_head(&self, repo: &str, digest: &Digest, size: u64) -> Result<bool, RegistryError> {
        const OP: &str = "blob head";
        let response = self
            .send(ApiRequest::new(Method::Head, format!("/v2/{repo}/blobs/{digest}")))
            .await?;

        match response.status {
            200 => {
                check_length(OP, &response, size)?;
                check_digest_header(OP, &response, digest)?;
                Ok(true)
            }
            404 => Ok(false),
            _ => Err(unexpected(OP, "200 or 404", &response)),
        }
    }

    /// Fetches a blob and verifies its content against `digest`.
    ///
    /// # Errors
    ///
    /// Returns a protocol error on any contract violation.
    pub async fn blob_get(&self, repo: &str, digest: &Digest) -> Result<Vec<u8>, RegistryError> {
        const OP: &str = "blob get";
        let response = self
            .send(ApiRequest::new(Method::Get, format!("/v2/{repo}/blobs/{digest}")))
            .await?;
        expect(OP, &response, &[200])?;
        check_digest_header(OP, &response, digest)?;
        verify_content(OP, digest, &response.body)?;
        Ok(response.body)
    }

    /// Fetches bytes `start..=end` of a blob.
    ///
    /// # Errors
    ///
    /// Returns a protocol error unless the registry answers 206 with exactly
    /// the requested extent.
    pub async fn blob_get_range(&self, repo: &str, digest: &Digest, start: u64, end: u64) -> Result<Vec<u8>, RegistryError> {
        const OP: &str = "blob get range";
        let request = ApiRequest::new(Method::Get, format!("/v2/{repo}/blobs/{digest}"))
            .header(headers::RANGE, format!("bytes={start}-{end}"));
        let response = self.send(request).await?;
        expect(OP, &response, &[206])?;

        let expected = end - start + 1;
        if response.body.len() as u64 != expected {
            return Err(RegistryError::ContentMismatch {
                operation: OP,
                expected: format!("{expected} bytes"),
                actual: format!("{} bytes", response.body.len()),
            });
        }
        Ok(response.body)
    }

    /// Deletes a blob.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unsupported`] on 404 or 405, and a protocol
    /// error for any other status than 202.
    pub async fn blob_delete(&self, repo: &str, digest: &Digest) -> Result<(), RegistryError> {
        const OP: &str = "blob delete";
        let response = self
            .send(ApiRequest::new(Method::Delete, format!("/v2/{repo}/blobs/{digest}")))
            .await?;

        match response.status {
            202 => Ok(()),
            404 | 405 => Err(RegistryError::Unsupported {
                operation: OP,
                status: response.status,
            }),
            _ => Err(unexpected(OP, "202", &response)),
        }
    }

    /// Pushes a manifest or index under `reference` (a tag or its digest).
    ///
    /// The registry must answer 201 with `Location`, and send `OCI-Subject`
    /// exactly when the document declares a subject.
    ///
    /// # Errors
    ///
    /// Returns a protocol error on any contract violation.
    pub async fn manifest_put(&self, repo: &str, reference: &str, upload: ManifestUpload<'_>) -> Result<(), RegistryError> {
        const OP: &str = "manifest put";
        let request = ApiRequest::new(Method::Put, format!("/v2/{repo}/manifests/{reference}"))
            .header(headers::CONTENT_TYPE, upload.media_type.as_str())
            .body(upload.body.to_vec());
        let response = self.send(request).await?;

        expect(OP, &response, &[201])?;
        require_header(OP, &response, headers::LOCATION)?;
        check_digest_header(OP, &response, upload.digest)?;

        match (upload.subject, response.header(headers::OCI_SUBJECT)) {
            (Some(subject), Some(value)) if value.trim() != subject.to_string() => Err(RegistryError::InvalidHeader {
                operation: OP,
                header: headers::OCI_SUBJECT,
                value: value.to_string(),
                reason: format!("expected {subject}"),
            }),
            (Some(_), None) => Err(RegistryError::MissingHeader {
                operation: OP,
                header: headers::OCI_SUBJECT,
            }),
            (None, Some(value)) => Err(RegistryError::InvalidHeader {
                operation: OP,
                header: headers::OCI_SUBJECT,
                value: value.to_string(),
                reason: "sent for a document without subject".to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Fetches a manifest and verifies it hashes to `digest`.
    ///
    /// # Errors
    ///
    /// Returns a protocol error on any contract violation.
    pub async fn manifest_get(
        &self,
        repo: &str,
        reference: &str,
        digest: &Digest,
        media_type: &MediaType,
    ) -> Result<Vec<u8>, RegistryError> {
        const OP: &str = "manifest get";
        let request = ApiRequest::new(Method::Get, format!("/v2/{repo}/manifests/{reference}"))
            .header(headers::ACCEPT, media_type.as_str());
        let response = self.send(request).await?;

        expect(OP, &response, &[200])?;
        check_content_type(OP, &response, media_type)?;
        check_digest_header(OP, &response, digest)?;
        verify_content(OP, digest, &response.body)?;
        Ok(response.body)
    }

    /// Checks a manifest's existence with `HEAD`. Returns false on 404.
    ///
    /// # Errors
    ///
    /// Returns a protocol error on any contract violation.
    pub async fn manifest_head(
        &self,
        repo: &str,
        reference: &str,
        digest: &Digest,
        media_type: &MediaType,
    ) -> Result<bool, RegistryError> {
        const OP: &str = "manifest head";
        let request = ApiRequest::new(Method::Head, format!("/v2/{repo}/manifests/{reference}"))
            .header(headers::ACCEPT, media_type.as_str());
        let response = self.send(request).await?;

        match response.status {
            200 => {
                check_digest_header(OP, &response, digest)?;
                Ok(true)
            }
            404 => Ok(false),
            _ => Err(unexpected(OP, "200 or 404", &response)),
        }
    }

    /// Deletes a manifest or a tag.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unsupported`] on 400 or 405, and a protocol
    /// error for any other status than 202.
    pub async fn manifest_delete(&self, repo: &str, reference: &str) -> Result<(), RegistryError> {
        const OP: &str = "manifest delete";
        let response = self
            .send(ApiRequest::new(Method::Delete, format!("/v2/{repo}/manifests/{reference}")))
            .await?;

        match response.status {
            202 => Ok(()),
            400 | 405 => Err(RegistryError::Unsupported {
                operation: OP,
                status: response.status,
            }),
            _ => Err(unexpected(OP, "202", &response)),
        }
    }

    /// Fetches one page of the tag list.
    ///
    /// # Errors
    ///
    /// Returns a protocol error on a bad status, a malformed body, or a page
    /// longer than `n`.
    pub async fn tag_list(&self, repo: &str, n: Option<usize>, last: Option<&str>) -> Result<TagPage, RegistryError> {
        const OP: &str = "tag list";
        let mut query = Vec::new();
        if let Some(n) = n {
            query.push(format!("n={n}"));
        }
        if let Some(last) = last {
            query.push(format!("last={}", encode(last)));
        }
        let target = if query.is_empty() {
            format!("/v2/{repo}/tags/list")
        } else {
            format!("/v2/{repo}/tags/list?{}", query.join("&"))
        };

        let response = self.send(ApiRequest::new(Method::Get, target)).await?;
        expect(OP, &response, &[200])?;
        let list: TagList = decode(OP, &response.body)?;

        if let Some(n) = n {
            if list.tags.len() > n {
                return Err(RegistryError::ContentMismatch {
                    operation: OP,
                    expected: format!("at most {n} tags"),
                    actual: format!("{} tags", list.tags.len()),
                });
            }
        }

        let next = response.header(headers::LINK).and_then(next_link);
        Ok(TagPage { list, next })
    }

    /// Lists every tag by paging with `n` and `last`.
    ///
    /// # Errors
    ///
    /// Propagates [`Distribution::tag_list`] errors, and reports a page that
    /// does not advance past `last` as a protocol error.
    pub async fn tag_list_all(&self, repo: &str, page_size: usize) -> Result<Vec<String>, RegistryError> {
        const OP: &str = "tag list";
        let page_size = page_size.max(1);
        let mut tags: Vec<String> = Vec::new();

        for _ in 0..MAX_PAGES {
            let last = tags.last().cloned();
            let page = self.tag_list(repo, Some(page_size), last.as_deref()).await?;
            let count = page.list.tags.len();

            if let (Some(last), Some(first)) = (&last, page.list.tags.first()) {
                if first <= last {
                    return Err(RegistryError::ContentMismatch {
                        operation: OP,
                        expected: format!("tags after {last}"),
                        actual: first.clone(),
                    });
                }
            }
            tags.extend(page.list.tags);
            if count < page_size {
                break;
            }
        }
        Ok(tags)
    }

    /// Lists the referrers of `digest`, optionally filtered by artifact type.
    ///
    /// Follows `Link` pagination.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Unsupported`] on 404, and a protocol error on
    /// any other contract violation.
    pub async fn referrers(&self, repo: &str, digest: &Digest, artifact_type: Option<&str>) -> Result<Referrers, RegistryError> {
        const OP: &str = "referrers";
        let mut target = match artifact_type {
            Some(artifact_type) => format!("/v2/{repo}/referrers/{digest}?artifactType={}", encode(artifact_type)),
            None => format!("/v2/{repo}/referrers/{digest}"),
        };

        let mut manifests = Vec::new();
        let mut filtered = false;
        for _ in 0..MAX_PAGES {
            let response = self.send(ApiRequest::new(Method::Get, target.clone())).await?;
            if response.status == 404 {
                return Err(RegistryError::Unsupported {
                    operation: OP,
                    status: 404,
                });
            }
            expect(OP, &response, &[200])?;
            check_content_type(OP, &response, &MediaType::index())?;

            let index: Index = decode(OP, &response.body)?;
            manifests.extend(index.manifests);
            filtered |= response
                .header(headers::OCI_FILTERS_APPLIED)
                .is_some_and(|v| v.split(',').any(|f| f.trim() == "artifactType"));

            match response.header(headers::LINK).and_then(next_link) {
                Some(next) => target = next,
                None => break,
            }
        }

        Ok(Referrers { manifests, filtered })
    }

    async fn open_session(&self, op: &'static str, repo: &str) -> Result<String, RegistryError> {
        let response = self
            .send(ApiRequest::new(Method::Post, format!("/v2/{repo}/blobs/uploads/")))
            .await?;
        expect(op, &response, &[202])?;
        Ok(require_header(op, &response, headers::LOCATION)?.to_string())
    }

    async fn commit(&self, op: &'static str, location: &str, digest: &Digest, body: Vec<u8>) -> Result<(), RegistryError> {
        let separator = if location.contains('?') { '&' } else { '?' };
        let request = ApiRequest::new(Method::Put, format!("{location}{separator}digest={digest}"))
            .header(headers::CONTENT_TYPE, OCTET_STREAM)
            .body(body);
        let response = self.send(request).await?;
        expect(op, &response, &[201])?;
        require_header(op, &response, headers::LOCATION)?;
        check_digest_header(op, &response, digest)
    }
}

fn expect(op: &'static str, response: &ApiResponse, allowed: &[u16]) -> Result<(), RegistryError> {
    if allowed.contains(&response.status) {
        return Ok(());
    }
    let expected = allowed
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" or ");
    Err(unexpected(op, &expected, response))
}

/// Builds the error for a disallowed status, validating any 4xx error body.
fn unexpected(op: &'static str, expected: &str, response: &ApiResponse) -> RegistryError {
    let mut detail = String::new();
    if (400..500).contains(&response.status) {
        match check_error_body(&response.body) {
            Ok(Some(body)) => detail = body.codes(),
            Ok(None) => {}
            Err(reason) => {
                return RegistryError::ErrorBody {
                    operation: op,
                    status: response.status,
                    reason,
                }
            }
        }
    }
    RegistryError::UnexpectedStatus {
        operation: op,
        expected: expected.to_string(),
        actual: response.status,
        detail,
    }
}

fn require_header<'r>(op: &'static str, response: &'r ApiResponse, header: &'static str) -> Result<&'r str, RegistryError> {
    response
        .header(header)
        .filter(|v| !v.trim().is_empty())
        .ok_or(RegistryError::MissingHeader { operation: op, header })
}

/// Checks an upload `Range` header reports bytes `0-end`.
fn check_range(op: &'static str, response: &ApiResponse, end: usize) -> Result<(), RegistryError> {
    let value = require_header(op, response, headers::RANGE)?;
    let extent = value.trim().trim_start_matches("bytes=");
    if extent == format!("0-{end}") {
        Ok(())
    } else {
        Err(RegistryError::InvalidHeader {
            operation: op,
            header: headers::RANGE,
            value: value.to_string(),
            reason: format!("expected 0-{end}"),
        })
    }
}

fn check_length(op: &'static str, response: &ApiResponse, size: u64) -> Result<(), RegistryError> {
    let value = require_header(op, response, headers::CONTENT_LENGTH)?;
    match value.trim().parse::<u64>() {
        Ok(length) if length == size => Ok(()),
        _ => Err(RegistryError::InvalidHeader {
            operation: op,
            header: headers::CONTENT_LENGTH,
            value: value.to_string(),
            reason: format!("expected {size}"),
        }),
    }
}

/// `Docker-Content-Digest` is optional, but must match when sent.
fn check_digest_header(op: &'static str, response: &ApiResponse, digest: &Digest) -> Result<(), RegistryError> {
    match response.header(headers::DOCKER_CONTENT_DIGEST) {
        Some(value) if value.trim() != digest.to_string() => Err(RegistryError::InvalidHeader {
            operation: op,
            header: headers::DOCKER_CONTENT_DIGEST,
            value: value.to_string(),
            reason: format!("expected {digest}"),
        }),
        _ => Ok(()),
    }
}

fn check_content_type(op: &'static str, response: &ApiResponse, media_type: &MediaType) -> Result<(), RegistryError> {
    let value = require_header(op, response, headers::CONTENT_TYPE)?;
    let essence = value.split(';').next().unwrap_or_default().trim();
    if essence == media_type.as_str() {
        Ok(())
    } else {
        Err(RegistryError::InvalidHeader {
            operation: op,
            header: headers::CONTENT_TYPE,
            value: value.to_string(),
            reason: format!("expected {media_type}"),
        })
    }
}

fn verify_content(op: &'static str, digest: &Digest, body: &[u8]) -> Result<(), RegistryError> {
    if digest.verifies(body) {
        return Ok(());
    }
    Err(RegistryError::ContentMismatch {
        operation: op,
        expected: digest.to_string(),
        actual: digest.algorithm().digest(body).to_string(),
    })
}

fn decode<T: serde::de::DeserializeOwned>(op: &'static str, body: &[u8]) -> Result<T, RegistryError> {
    serde_json::from_slice(body).map_err(|source| RegistryError::MalformedBody { operation: op, source })
}

fn encode(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::*;

    /// Replays canned responses and records the requests it saw.
    #[derive(Default)]
    struct Scripted {
        responses: Mutex<VecDeque<ApiResponse>>,
        requests: Mutex<Vec<ApiRequest>>,
    }

    impl Scripted {
        fn new(responses: Vec<ApiResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::default(),
            })
        }

        fn requests(&self) -> Vec<ApiRequest> {
            self.requests.lock().clone()
        }
    }

    #[async_trait]
    impl RegistryApi for Scripted {
        async fn send(&self, request: ApiRequest) -> Result<ApiResponse, RegistryError> {
            self.requests.lock().push(request);
            Ok(self.responses.lock().pop_front().unwrap_or_else(|| ApiResponse::new(500)))
        }
    }

    fn driver(api: &Arc<Scripted>) -> Distribution {
        Distribution::new(Arc::clone(api) as Arc<dyn RegistryApi>)
    }

    fn digest() -> Digest {
        Digest::canonical(b"0123456789")
    }

    #[tokio::test]
    async fn test_post_put_sends_digest_on_commit() {
        let api = Scripted::new(vec![
            ApiResponse::new(202).with_header("Location", "/v2/a/blobs/uploads/1?state=x"),
            ApiResponse::new(201).with_header("Location", "/v2/a/blobs/sha256:x"),
        ]);
        driver(&api).blob_post_put("a", &digest(), b"0123456789").await.unwrap();

        let requests = api.requests();
        assert_eq!(requests[0].method, Method::Post);
        assert_eq!(requests[1].method, Method::Put);
        assert_eq!(requests[1].target, format!("/v2/a/blobs/uploads/1?state=x&digest={}", digest()));
        assert_eq!(requests[1].body, b"0123456789");
    }

    #[tokio::test]
    async fn test_upload_init_without_location_is_violation() {
        let api = Scripted::new(vec![ApiResponse::new(202)]);
        let err = driver(&api).blob_post_put("a", &digest(), b"0123456789").await.unwrap_err();
        assert!(matches!(err, RegistryError::MissingHeader { header: "location", .. }));
        assert!(err.is_protocol_violation());
    }

    #[tokio::test]
    async fn test_chunked_upload_checks_ranges() {
        let api = Scripted::new(vec![
            ApiResponse::new(202).with_header("Location", "/u/1"),
            ApiResponse::new(202).with_header("Location", "/u/2").with_header("Range", "0-3"),
            ApiResponse::new(202).with_header("Location", "/u/3").with_header("Range", "0-7"),
            ApiResponse::new(202).with_header("Location", "/u/4").with_header("Range", "0-9"),
            ApiResponse::new(201).with_header("Location", "/v2/a/blobs/x"),
        ]);
        driver(&api).blob_patch_chunked("a", &digest(), b"0123456789", 4).await.unwrap();

        let requests = api.requests();
        assert_eq!(requests.len(), 5);
        assert_eq!(requests[1].header_value("content-range"), Some("0-3"));
        assert_eq!(requests[2].target, "/u/2");
        assert_eq!(requests[3].header_value("content-range"), Some("8-9"));
        assert!(requests[4].body.is_empty());
        assert!(requests[4].target.starts_with("/u/4?digest="));
    }

    #[tokio::test]
    async fn test_chunked_upload_wrong_range_fails() {
        let api = Scripted::new(vec![
            ApiResponse::new(202).with_header("Location", "/u/1"),
            ApiResponse::new(202).with_header("Location", "/u/2").with_header("Range", "0-2"),
        ]);
        let err = driver(&api).blob_patch_chunked("a", &digest(), b"0123456789", 4).await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidHeader { header: "range", .. }));
    }

    #[tokio::test]
    async fn test_manifest_put_requires_subject_header() {
        let subject = Digest::canonical(b"subject");
        let body = b"{}".to_vec();
        let manifest_digest = Digest::canonical(&body);
        let media_type = MediaType::manifest();
        let upload = ManifestUpload {
            digest: &manifest_digest,
            media_type: &media_type,
            body: &body,
            subject: Some(&subject),
        };

        let api = Scripted::new(vec![ApiResponse::new(201).with_header("Location", "/v2/a/manifests/x")]);
        let err = driver(&api).manifest_put("a", "x", upload).await.unwrap_err();
        assert!(matches!(err, RegistryError::MissingHeader { header: "oci-subject", .. }));

        let api = Scripted::new(vec![ApiResponse::new(201)
            .with_header("Location", "/v2/a/manifests/x")
            .with_header("OCI-Subject", subject.to_string())]);
        driver(&api).manifest_put("a", "x", upload).await.unwrap();
        assert_eq!(api.requests()[0].header_value("content-type"), Some(MediaType::OCI_MANIFEST));
    }

    #[tokio::test]
    async fn test_manifest_put_rejects_unexpected_subject_header() {
        let body = b"{}".to_vec();
        let manifest_digest = Digest::canonical(&body);
        let media_type = MediaType::manifest();
        let upload = ManifestUpload {
            digest: &manifest_digest,
            media_type: &media_type,
            body: &body,
            subject: None,
        };

        let api = Scripted::new(vec![ApiResponse::new(201)
            .with_header("Location", "/v2/a/manifests/x")
            .with_header("OCI-Subject", "sha256:00")]);
        let err = driver(&api).manifest_put("a", "x", upload).await.unwrap_err();
        assert!(err.is_protocol_violation());
    }

    #[tokio::test]
    async fn test_error_body_with_unknown_code_is_violation() {
        let api = Scripted::new(vec![
            ApiResponse::new(400).with_body(br#"{"errors":[{"code":"WHATEVER","message":"x"}]}"#.to_vec())
        ]);
        let err = driver(&api).blob_post_put("a", &digest(), b"0123456789").await.unwrap_err();
        assert!(matches!(err, RegistryError::ErrorBody { status: 400, .. }));
    }

    #[tokio::test]
    async fn test_unexpected_status_carries_error_codes() {
        let api = Scripted::new(vec![
            ApiResponse::new(404).with_body(br#"{"errors":[{"code":"BLOB_UNKNOWN","message":"x"}]}"#.to_vec())
        ]);
        let err = driver(&api).blob_get("a", &digest()).await.unwrap_err();
        assert!(err.to_string().contains("BLOB_UNKNOWN"));
    }

    #[tokio::test]
    async fn test_blob_get_verifies_content() {
        let api = Scripted::new(vec![ApiResponse::new(200).with_body(b"tampered".to_vec())]);
        let err = driver(&api).blob_get("a", &digest()).await.unwrap_err();
        assert!(matches!(err, RegistryError::ContentMismatch { .. }));
    }

    #[tokio::test]
    async fn test_blob_head_reports_absence() {
        let api = Scripted::new(vec![
            ApiResponse::new(404),
            ApiResponse::new(200).with_header("Content-Length", "10"),
            ApiResponse::new(200).with_header("Content-Length", "11"),
        ]);
        let distribution = driver(&api);
        assert!(!distribution.blob_head("a", &digest(), 10).await.unwrap());
        assert!(distribution.blob_head("a", &digest(), 10).await.unwrap());
        assert!(distribution.blob_head("a", &digest(), 10).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_unsupported() {
        let api = Scripted::new(vec![ApiResponse::new(405), ApiResponse::new(400)]);
        let distribution = driver(&api);
        assert!(distribution.blob_delete("a", &digest()).await.unwrap_err().is_unsupported());
        assert!(distribution.manifest_delete("a", "tag").await.unwrap_err().is_unsupported());
    }

    #[tokio::test]
    async fn test_tag_list_pagination() {
        let api = Scripted::new(vec![
            ApiResponse::new(200).with_body(br#"{"name":"a","tags":["a","b"]}"#.to_vec()),
            ApiResponse::new(200).with_body(br#"{"name":"a","tags":["c"]}"#.to_vec()),
        ]);
        let tags = driver(&api).tag_list_all("a", 2).await.unwrap();
        assert_eq!(tags, vec!["a", "b", "c"]);
        assert_eq!(api.requests()[1].target, "/v2/a/tags/list?n=2&last=b");
    }

    #[tokio::test]
    async fn test_tag_list_page_too_long() {
        let api = Scripted::new(vec![
            ApiResponse::new(200).with_body(br#"{"name":"a","tags":["a","b","c"]}"#.to_vec())
        ]);
        let err = driver(&api).tag_list("a", Some(2), None).await.unwrap_err();
        assert!(err.is_protocol_violation());
    }

    #[tokio::test]
    async fn test_referrers_filter_and_encoding() {
        let api = Scripted::new(vec![ApiResponse::new(200)
            .with_header("Content-Type", MediaType::OCI_INDEX)
            .with_header("OCI-Filters-Applied", "artifactType")
            .with_body(br#"{"schemaVersion":2,"mediaType":"application/vnd.oci.image.index.v1+json","manifests":[]}"#.to_vec())]);
        let referrers = driver(&api)
            .referrers("a", &digest(), Some("application/vnd.example+json"))
            .await
            .unwrap();

        assert!(referrers.filtered);
        assert!(referrers.manifests.is_empty());
        assert!(api.requests()[0]
            .target
            .ends_with("?artifactType=application%2Fvnd.example%2Bjson"));
    }

    #[tokio::test]
    async fn test_referrers_not_found_is_unsupported() {
        let api = Scripted::new(vec![ApiResponse::new(404)]);
        let err = driver(&api).referrers("a", &digest(), None).await.unwrap_err();
        assert!(err.is_unsupported());
    }

    #[tokio::test]
    async fn test_mount_fallback_completes_upload() {
        let api = Scripted::new(vec![
            ApiResponse::new(202).with_header("Location", "/u/1"),
            ApiResponse::new(201).with_header("Location", "/v2/b/blobs/x"),
        ]);
        let outcome = driver(&api)
            .blob_mount("b", &digest(), Some("a"), b"0123456789")
            .await
            .unwrap();
        assert_eq!(outcome, MountOutcome::Fallback);
        assert_eq!(
            api.requests()[0].target,
            format!("/v2/b/blobs/uploads/?mount={}&from=a", digest())
        );
    }
}
