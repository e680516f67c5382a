//! In-process reference registry.
//!
//! [`MemoryRegistry`] answers [`RegistryApi`] requests the way a conformant
//! registry would, from state held in memory. [`Misbehavior`] switches make
//! it break specific parts of the contract so the runner's verdicts can be
//! checked without a network.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;
use regconform_core::{Descriptor, Digest, Index, Manifest, MediaType};
use regconform_registry::api::headers;
use regconform_registry::{ApiRequest, ApiResponse, ErrorCode, ErrorResponse, Method, RegistryApi, RegistryError, TagList};
use tracing::trace;

/// Contract violations the registry can be told to commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(clippy::struct_excessive_bools)]
pub struct Misbehavior {
    /// Answer ranged blob fetches with the full blob and 200.
    pub reject_ranges: bool,
    /// Leave out `OCI-Subject` when a manifest with a subject is pushed.
    pub omit_subject_header: bool,
    /// Answer every delete with 405.
    pub refuse_deletes: bool,
    /// Acknowledge deletes without removing anything.
    pub stale_deletes: bool,
    /// Answer referrers queries with 404.
    pub no_referrers: bool,
}

#[derive(Debug)]
struct StoredManifest {
    media_type: String,
    body: Vec<u8>,
}

#[derive(Debug, Default)]
struct Repo {
    blobs: HashMap<Digest, Vec<u8>>,
    manifests: HashMap<Digest, StoredManifest>,
    tags: BTreeMap<String, Digest>,
}

#[derive(Debug)]
struct Upload {
    repo: String,
    data: Vec<u8>,
}

#[derive(Debug, Default)]
struct State {
    repos: HashMap<String, Repo>,
    uploads: HashMap<String, Upload>,
    next_upload: u64,
}

/// A registry that lives in the test process.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    misbehavior: Misbehavior,
    state: Mutex<State>,
}

enum Route<'a> {
    Base,
    Uploads { repo: &'a str, session: &'a str },
    Blob { repo: &'a str, digest: &'a str },
    Manifest { repo: &'a str, reference: &'a str },
    Referrers { repo: &'a str, digest: &'a str },
    Tags { repo: &'a str },
}

impl MemoryRegistry {
    /// Creates a conformant, empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty registry that commits the given violations.
    #[must_use]
    pub fn with_misbehavior(misbehavior: Misbehavior) -> Self {
        Self {
            misbehavior,
            state: Mutex::default(),
        }
    }

    /// Returns whether `repo` holds the blob.
    #[must_use]
    pub fn has_blob(&self, repo: &str, digest: &Digest) -> bool {
        self.state
            .lock()
            .repos
            .get(repo)
            .is_some_and(|r| r.blobs.contains_key(digest))
    }

    /// Returns whether `repo` holds the manifest.
    #[must_use]
    pub fn has_manifest(&self, repo: &str, digest: &Digest) -> bool {
        self.state
            .lock()
            .repos
            .get(repo)
            .is_some_and(|r| r.manifests.contains_key(digest))
    }

    /// Tags currently in `repo`, sorted.
    #[must_use]
    pub fn tags(&self, repo: &str) -> Vec<String> {
        self.state
            .lock()
            .repos
            .get(repo)
            .map(|r| r.tags.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of upload sessions still open.
    #[must_use]
    pub fn open_uploads(&self) -> usize {
        self.state.lock().uploads.len()
    }

    fn handle(&self, request: &ApiRequest) -> ApiResponse {
        let (path, query) = split_target(&request.target);
        let query: HashMap<String, String> = url::form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();

        let Some(route) = route(path) else {
            return error(404, ErrorCode::NameUnknown, format!("no route for {path}"));
        };

        match (route, request.method) {
            (Route::Base, Method::Get | Method::Head) => ApiResponse::new(200),
            (Route::Uploads { repo, session: "" }, Method::Post) => self.post_upload(repo, &query, &request.body),
            (Route::Uploads { repo, session }, Method::Patch) => self.patch_upload(repo, session, request),
            (Route::Uploads { repo, session }, Method::Put) => {
                self.put_upload(repo, session, &query, &request.body)
            }
            (Route::Blob { repo, digest }, Method::Get | Method::Head) => self.get_blob(repo, digest, request),
            (Route::Blob { repo, digest }, Method::Delete) => self.delete_blob(repo, digest),
            (Route::Manifest { repo, reference }, Method::Put) => self.put_manifest(repo, reference, request),
            (Route::Manifest { repo, reference }, Method::Get | Method::Head) => {
                self.get_manifest(repo, reference, request.method)
            }
            (Route::Manifest { repo, reference }, Method::Delete) => self.delete_manifest(repo, reference),
            (Route::Referrers { repo, digest }, Method::Get) => self.referrers(repo, digest, &query),
            (Route::Tags { repo }, Method::Get) => self.tag_list(repo, &query),
            (_, method) => error(405, ErrorCode::Unsupported, format!("{method} not allowed on {path}")),
        }
    }

    fn post_upload(&self, repo: &str, query: &HashMap<String, String>, body: &[u8]) -> ApiResponse {
        let mut state = self.state.lock();

        if let Some(mount) = query.get("mount") {
            let Ok(digest) = mount.parse::<Digest>() else {
                return error(400, ErrorCode::DigestInvalid, format!("invalid digest {mount}"));
            };
            let source = match query.get("from") {
                Some(from) => state.repos.get(from).and_then(|r| r.blobs.get(&digest)).cloned(),
                None => state.repos.values().find_map(|r| r.blobs.get(&digest)).cloned(),
            };
            if let Some(data) = source {
                state.repos.entry(repo.to_string()).or_default().blobs.insert(digest.clone(), data);
                return blob_created(repo, &digest);
            }
            return open_session(&mut state, repo);
        }

        if let Some(digest) = query.get("digest") {
            return store_blob(&mut state, repo, digest, body.to_vec());
        }

        open_session(&mut state, repo)
    }

    fn patch_upload(&self, repo: &str, session: &str, request: &ApiRequest) -> ApiResponse {
        let mut state = self.state.lock();
        let Some(upload) = state.uploads.get_mut(session).filter(|u| u.repo == repo) else {
            return error(404, ErrorCode::BlobUploadUnknown, format!("upload {session} unknown"));
        };

        if let Some(range) = request.header_value(headers::CONTENT_RANGE) {
            let expected_end = (upload.data.len() + request.body.len()).checked_sub(1);
            match parse_extent(range.trim_start_matches("bytes=")) {
                Some((start, end))
                    if usize::try_from(start).ok() == Some(upload.data.len())
                        && usize::try_from(end).ok() == expected_end => {}
                _ => {
                    let mut response = error(416, ErrorCode::BlobUploadInvalid, format!("range {range} out of order"));
                    if let Some(end) = upload.data.len().checked_sub(1) {
                        response = response.with_header(headers::RANGE, format!("0-{end}"));
                    }
                    return response;
                }
            }
        }

        upload.data.extend_from_slice(&request.body);
        let end = upload.data.len().saturating_sub(1);
        ApiResponse::new(202)
            .with_header(headers::LOCATION, upload_location(repo, session))
            .with_header(headers::RANGE, format!("0-{end}"))
            .with_header(headers::UPLOAD_UUID, session)
            .with_header(headers::CONTENT_LENGTH, "0")
    }

    fn put_upload(&self, repo: &str, session: &str, query: &HashMap<String, String>, body: &[u8]) -> ApiResponse {
        let mut state = self.state.lock();
        let owned = state.uploads.get(session).is_some_and(|u| u.repo == repo);
        let Some(mut upload) = state.uploads.remove(session).filter(|_| owned) else {
            return error(404, ErrorCode::BlobUploadUnknown, format!("upload {session} unknown"));
        };
        upload.data.extend_from_slice(body);

        let Some(digest) = query.get("digest") else {
            return error(400, ErrorCode::DigestInvalid, "digest parameter missing");
        };
        store_blob(&mut state, repo, digest, upload.data)
    }

    fn get_blob(&self, repo: &str, digest: &str, request: &ApiRequest) -> ApiResponse {
        let head = request.method == Method::Head;
        let Ok(digest) = digest.parse::<Digest>() else {
            return error(400, ErrorCode::DigestInvalid, format!("invalid digest {digest}"));
        };

        let state = self.state.lock();
        let Some(data) = state.repos.get(repo).and_then(|r| r.blobs.get(&digest)) else {
            return not_found(head, ErrorCode::BlobUnknown, format!("blob {digest} unknown"));
        };

        let total = data.len() as u64;
        let mut response = ApiResponse::new(200)
            .with_header(headers::CONTENT_TYPE, MediaType::OCTET_STREAM)
            .with_header(headers::DOCKER_CONTENT_DIGEST, digest.to_string());

        let range = request
            .header_value(headers::RANGE)
            .filter(|_| !self.misbehavior.reject_ranges && !head);
        let body = match range {
            Some(range) => {
                let extent = range
                    .strip_prefix("bytes=")
                    .and_then(parse_extent)
                    .filter(|(start, end)| start <= end)
                    .and_then(|(start, end)| {
                        let slice = data.get(usize::try_from(start).ok()?..=usize::try_from(end).ok()?)?;
                        Some((start, end, slice))
                    });
                let Some((start, end, slice)) = extent else {
                    return ApiResponse::new(416).with_header("content-range", format!("bytes */{total}"));
                };
                response.status = 206;
                response = response.with_header("content-range", format!("bytes {start}-{end}/{total}"));
                slice.to_vec()
            }
            None => data.clone(),
        };

        response = response.with_header(headers::CONTENT_LENGTH, body.len().to_string());
        if head {
            response
        } else {
            response.with_body(body)
        }
    }

    fn delete_blob(&self, repo: &str, digest: &str) -> ApiResponse {
        if self.misbehavior.refuse_deletes {
            return error(405, ErrorCode::Unsupported, "deletes are disabled");
        }
        let Ok(digest) = digest.parse::<Digest>() else {
            return error(400, ErrorCode::DigestInvalid, format!("invalid digest {digest}"));
        };

        let mut state = self.state.lock();
        let Some(repo_state) = state.repos.get_mut(repo).filter(|r| r.blobs.contains_key(&digest)) else {
            return error(404, ErrorCode::BlobUnknown, format!("blob {digest} unknown"));
        };
        if !self.misbehavior.stale_deletes {
            repo_state.blobs.remove(&digest);
        }
        ApiResponse::new(202)
    }

    fn put_manifest(&self, repo: &str, reference: &str, request: &ApiRequest) -> ApiResponse {
        let content_type = request
            .header_value(headers::CONTENT_TYPE)
            .unwrap_or_default()
            .to_string();
        let body = &request.body;

        let digest = match reference.parse::<Digest>() {
            Ok(digest) if digest.verifies(body) => digest,
            Ok(digest) => return error(400, ErrorCode::DigestInvalid, format!("body does not match {digest}")),
            Err(_) if is_tag(reference) => Digest::canonical(body),
            Err(_) => return error(400, ErrorCode::ManifestInvalid, format!("invalid reference {reference}")),
        };

        let mut state = self.state.lock();
        let repo_state = state.repos.entry(repo.to_string()).or_default();

        let subject = if content_type == MediaType::OCI_INDEX {
            match serde_json::from_slice::<Index>(body) {
                Ok(index) if index.media_type.as_str() == content_type => index.subject.map(|s| s.digest),
                _ => return error(400, ErrorCode::ManifestInvalid, "invalid image index"),
            }
        } else if content_type == MediaType::OCI_MANIFEST {
            let manifest = match serde_json::from_slice::<Manifest>(body) {
                Ok(manifest) if manifest.media_type.as_str() == content_type => manifest,
                _ => return error(400, ErrorCode::ManifestInvalid, "invalid image manifest"),
            };
            let mut required = std::iter::once(&manifest.config).chain(&manifest.layers);
            if let Some(missing) = required.find(|d| !repo_state.blobs.contains_key(&d.digest)) {
                let missing = &missing.digest;
                return error(400, ErrorCode::ManifestBlobUnknown, format!("blob {missing} unknown"));
            }
            manifest.subject.map(|s| s.digest)
        } else {
            return error(400, ErrorCode::ManifestInvalid, format!("unsupported media type '{content_type}'"));
        };

        repo_state.manifests.insert(
            digest.clone(),
            StoredManifest {
                media_type: content_type,
                body: body.clone(),
            },
        );
        if digest.to_string() != reference {
            repo_state.tags.insert(reference.to_string(), digest.clone());
        }

        let mut response = ApiResponse::new(201)
            .with_header(headers::LOCATION, format!("/v2/{repo}/manifests/{digest}"))
            .with_header(headers::DOCKER_CONTENT_DIGEST, digest.to_string());
        if let Some(subject) = subject.filter(|_| !self.misbehavior.omit_subject_header) {
            response = response.with_header(headers::OCI_SUBJECT, subject.to_string());
        }
        response
    }

    fn get_manifest(&self, repo: &str, reference: &str, method: Method) -> ApiResponse {
        let head = method == Method::Head;
        let state = self.state.lock();
        let found = state.repos.get(repo).and_then(|r| {
            let digest = match reference.parse::<Digest>() {
                Ok(digest) => digest,
                Err(_) => r.tags.get(reference)?.clone(),
            };
            r.manifests.get(&digest).map(|m| (digest, m))
        });
        let Some((digest, manifest)) = found else {
            return not_found(head, ErrorCode::ManifestUnknown, format!("manifest {reference} unknown"));
        };

        let response = ApiResponse::new(200)
            .with_header(headers::CONTENT_TYPE, manifest.media_type.clone())
            .with_header(headers::CONTENT_LENGTH, manifest.body.len().to_string())
            .with_header(headers::DOCKER_CONTENT_DIGEST, digest.to_string());
        if head {
            response
        } else {
            response.with_body(manifest.body.clone())
        }
    }

    fn delete_manifest(&self, repo: &str, reference: &str) -> ApiResponse {
        if self.misbehavior.refuse_deletes {
            return error(405, ErrorCode::Unsupported, "deletes are disabled");
        }

        let mut state = self.state.lock();
        let Some(repo_state) = state.repos.get_mut(repo) else {
            return error(404, ErrorCode::NameUnknown, format!("repository {repo} unknown"));
        };

        match reference.parse::<Digest>() {
            Ok(digest) => {
                if !repo_state.manifests.contains_key(&digest) {
                    return error(404, ErrorCode::ManifestUnknown, format!("manifest {digest} unknown"));
                }
                if !self.misbehavior.stale_deletes {
                    repo_state.manifests.remove(&digest);
                    repo_state.tags.retain(|_, target| *target != digest);
                }
            }
            Err(_) => {
                if !repo_state.tags.contains_key(reference) {
                    return error(404, ErrorCode::ManifestUnknown, format!("tag {reference} unknown"));
                }
                if !self.misbehavior.stale_deletes {
                    repo_state.tags.remove(reference);
                }
            }
        }
        ApiResponse::new(202)
    }

    fn tag_list(&self, repo: &str, query: &HashMap<String, String>) -> ApiResponse {
        let state = self.state.lock();
        let Some(repo_state) = state.repos.get(repo) else {
            return error(404, ErrorCode::NameUnknown, format!("repository {repo} unknown"));
        };
        let n = match query.get("n").map(|n| n.parse::<usize>()) {
            Some(Ok(n)) => Some(n),
            Some(Err(_)) => return error(400, ErrorCode::Unsupported, "invalid n"),
            None => None,
        };
        let last = query.get("last");

        let mut remaining = repo_state
            .tags
            .keys()
            .filter(|tag| last.map_or(true, |last| *tag > last));
        let tags: Vec<String> = match n {
            Some(n) => remaining.by_ref().take(n).cloned().collect(),
            None => remaining.by_ref().cloned().collect(),
        };
        let more = remaining.next().is_some();

        let mut response = json(
            200,
            &TagList {
                name: repo.to_string(),
                tags: tags.clone(),
            },
        );
        if let (true, Some(n), Some(last)) = (more, n, tags.last()) {
            let last: String = url::form_urlencoded::byte_serialize(last.as_bytes()).collect();
            response = response.with_header(
                headers::LINK,
                format!("</v2/{repo}/tags/list?n={n}&last={last}>; rel=\"next\""),
            );
        }
        response
    }

    fn referrers(&self, repo: &str, digest: &str, query: &HashMap<String, String>) -> ApiResponse {
        if self.misbehavior.no_referrers {
            return ApiResponse::new(404);
        }
        let Ok(subject) = digest.parse::<Digest>() else {
            return error(400, ErrorCode::DigestInvalid, format!("invalid digest {digest}"));
        };
        let artifact_type = query.get("artifactType");

        let state = self.state.lock();
        let mut descriptors: Vec<Descriptor> = state
            .repos
            .get(repo)
            .filter(|r| r.manifests.contains_key(&subject))
            .map(|r| {
                r.manifests
                    .iter()
                    .filter_map(|(digest, stored)| referrer_descriptor(digest, stored, &subject))
                    .collect()
            })
            .unwrap_or_default();

        if let Some(artifact_type) = artifact_type {
            descriptors.retain(|d| d.artifact_type.as_ref() == Some(artifact_type));
        }
        descriptors.sort_by(|a, b| a.digest.cmp(&b.digest));

        let mut response = json(200, &Index::new(descriptors)).with_header(headers::CONTENT_TYPE, MediaType::OCI_INDEX);
        if artifact_type.is_some() {
            response = response.with_header(headers::OCI_FILTERS_APPLIED, "artifactType");
        }
        response
    }
}

#[async_trait]
impl RegistryApi for MemoryRegistry {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, RegistryError> {
        let response = self.handle(&request);
        trace!(method = %request.method, target = %request.target, status = response.status, "Memory registry");
        Ok(response)
    }
}

/// Strips scheme and authority from absolute targets and splits off the query.
fn split_target(target: &str) -> (&str, &str) {
    let path = match target.find("://") {
        Some(scheme_end) => {
            let rest = &target[scheme_end + 3..];
            rest.find('/').map_or("/", |slash| &rest[slash..])
        }
        None => target,
    };
    path.split_once('?').unwrap_or((path, ""))
}

fn route<'a>(path: &'a str) -> Option<Route<'a>> {
    let rest = path.strip_prefix("/v2/").or_else(|| (path == "/v2").then_some(""))?;
    if rest.is_empty() {
        return Some(Route::Base);
    }
    if let Some(repo) = rest.strip_suffix("/tags/list") {
        return Some(Route::Tags { repo });
    }

    let markers: [(&str, fn(&'a str, &'a str) -> Route<'a>); 4] = [
        ("/blobs/uploads/", |repo, session| Route::Uploads { repo, session }),
        ("/blobs/", |repo, digest| Route::Blob { repo, digest }),
        ("/manifests/", |repo, reference| Route::Manifest { repo, reference }),
        ("/referrers/", |repo, digest| Route::Referrers { repo, digest }),
    ];
    markers.into_iter().find_map(|(marker, build)| {
        let at = rest.rfind(marker)?;
        let repo = &rest[..at];
        (!repo.is_empty()).then(|| build(repo, &rest[at + marker.len()..]))
    })
}

fn referrer_descriptor(digest: &Digest, stored: &StoredManifest, subject: &Digest) -> Option<Descriptor> {
    let media_type = MediaType::new(stored.media_type.clone());
    let (declared, artifact_type, annotations) = if stored.media_type == MediaType::OCI_INDEX {
        let index: Index = serde_json::from_slice(&stored.body).ok()?;
        (index.subject?.digest, index.artifact_type, index.annotations)
    } else {
        let manifest: Manifest = serde_json::from_slice(&stored.body).ok()?;
        let artifact_type = manifest
            .artifact_type
            .or_else(|| Some(manifest.config.media_type.to_string()));
        (manifest.subject?.digest, artifact_type, manifest.annotations)
    };
    if declared != *subject {
        return None;
    }

    let mut descriptor = Descriptor::new(media_type, digest.clone(), stored.body.len() as u64);
    descriptor.artifact_type = artifact_type;
    descriptor.annotations = annotations;
    Some(descriptor)
}

fn open_session(state: &mut State, repo: &str) -> ApiResponse {
    state.next_upload += 1;
    let session = format!("{:016x}", state.next_upload);
    state.uploads.insert(
        session.clone(),
        Upload {
            repo: repo.to_string(),
            data: Vec::new(),
        },
    );
    ApiResponse::new(202)
        .with_header(headers::LOCATION, upload_location(repo, &session))
        .with_header(headers::RANGE, "0-0")
        .with_header(headers::UPLOAD_UUID, session)
        .with_header(headers::CONTENT_LENGTH, "0")
}

fn store_blob(state: &mut State, repo: &str, digest: &str, data: Vec<u8>) -> ApiResponse {
    let digest = match digest.parse::<Digest>() {
        Ok(digest) if digest.verifies(&data) => digest,
        _ => return error(400, ErrorCode::DigestInvalid, format!("content does not match {digest}")),
    };
    state.repos.entry(repo.to_string()).or_default().blobs.insert(digest.clone(), data);
    blob_created(repo, &digest)
}

fn blob_created(repo: &str, digest: &Digest) -> ApiResponse {
    ApiResponse::new(201)
        .with_header(headers::LOCATION, format!("/v2/{repo}/blobs/{digest}"))
        .with_header(headers::DOCKER_CONTENT_DIGEST, digest.to_string())
        .with_header(headers::CONTENT_LENGTH, "0")
}

fn upload_location(repo: &str, session: &str) -> String {
    format!("/v2/{repo}/blobs/uploads/{session}")
}

fn parse_extent(extent: &str) -> Option<(u64, u64)> {
    let (start, end) = extent.trim().split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

fn is_tag(reference: &str) -> bool {
    let bytes = reference.as_bytes();
    !bytes.is_empty()
        && bytes.len() <= 128
        && (bytes[0].is_ascii_alphanumeric() || bytes[0] == b'_')
        && bytes
            .iter()
            .all(|b| b.is_ascii_alphanumeric() || matches!(*b, b'_' | b'.' | b'-'))
}

fn json<T: serde::Serialize>(status: u16, value: &T) -> ApiResponse {
    let body = serde_json::to_vec(value).unwrap_or_default();
    ApiResponse::new(status)
        .with_header(headers::CONTENT_TYPE, "application/json")
        .with_header(headers::CONTENT_LENGTH, body.len().to_string())
        .with_body(body)
}

fn error(status: u16, code: ErrorCode, message: impl Into<String>) -> ApiResponse {
    json(status, &ErrorResponse::single(code, message))
}

fn not_found(head: bool, code: ErrorCode, message: String) -> ApiResponse {
    if head {
        ApiResponse::new(404)
    } else {
        error(404, code, message)
    }
}
