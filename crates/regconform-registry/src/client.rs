//! reqwest-backed registry transport.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use tracing::debug;
use url::Url;

use crate::api::{ApiRequest, ApiResponse, Method, RegistryApi};
use crate::config::{RegistryAuth, RegistryConfig, TlsMode};
use crate::error::RegistryError;

/// HTTP client for a registry under test.
#[derive(Debug)]
pub struct RegistryClient {
    config: RegistryConfig,
    base: Url,
    http: reqwest::Client,
}

impl RegistryClient {
    /// Creates a new registry client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the HTTP client cannot be
    /// created.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use regconform_registry::{RegistryClient, RegistryConfig};
    ///
    /// let config = RegistryConfig::new("https://registry.example.com");
    /// let client = RegistryClient::new(config)?;
    /// # Ok::<(), regconform_registry::RegistryError>(())
    /// ```
    pub fn new(config: RegistryConfig) -> Result<Self, RegistryError> {
        let base_url = config.base_url();
        let base = Url::parse(&base_url).map_err(|_| RegistryError::InvalidUrl { url: base_url })?;
        let http = Self::build_http_client(&config)?;

        Ok(Self { config, base, http })
    }

    /// Returns the registry configuration.
    #[must_use]
    pub const fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Resolves a request target against the registry base URL.
    ///
    /// Absolute targets (from `Location` headers) are used as given.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidUrl`] if the target cannot be joined.
    pub fn resolve(&self, target: &str) -> Result<Url, RegistryError> {
        self.base.join(target).map_err(|_| RegistryError::InvalidUrl {
            url: target.to_string(),
        })
    }

    /// Maps a reqwest failure, reporting timeouts against the configured limit.
    fn transport_error(&self, err: reqwest::Error) -> RegistryError {
        if !err.is_timeout() {
            return err.into();
        }
        let limit = self.config.timeout;
        RegistryError::Timeout {
            operation: err
                .url()
                .map_or_else(|| "request".to_string(), ToString::to_string),
            seconds: limit.as_secs() + u64::from(limit.subsec_nanos() > 0),
        }
    }

    /// Builds the HTTP client with proper configuration.
    fn build_http_client(config: &RegistryConfig) -> Result<reqwest::Client, RegistryError> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent);

        if config.tls == TlsMode::Insecure {
            builder = builder.danger_accept_invalid_certs(true);
        }

        if let Some(ref ca_cert) = config.ca_cert {
            let cert_pem = std::fs::read(ca_cert)?;
            let cert = reqwest::Certificate::from_pem(&cert_pem).map_err(|e| RegistryError::InvalidRequest {
                message: format!("Invalid CA certificate {}: {e}", ca_cert.display()),
            })?;
            builder = builder.add_root_certificate(cert);
        }

        builder.build().map_err(|e| RegistryError::ConnectionFailed {
            url: config.url.clone(),
            source: e,
        })
    }

    /// Creates authentication headers based on configuration.
    fn auth_headers(&self) -> Result<HeaderMap, RegistryError> {
        let mut headers = HeaderMap::new();

        let value = match &self.config.auth {
            RegistryAuth::None => return Ok(headers),
            RegistryAuth::Basic { username, password } => {
                let credentials = base64::Engine::encode(
                    &base64::engine::general_purpose::STANDARD,
                    format!("{username}:{password}"),
                );
                format!("Basic {credentials}")
            }
            RegistryAuth::Bearer { token } => format!("Bearer {token}"),
        };

        let mut value = HeaderValue::from_str(&value).map_err(|_| RegistryError::InvalidRequest {
            message: "credentials are not a valid header value".to_string(),
        })?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
        Ok(headers)
    }

    fn request_headers(&self, request: &ApiRequest) -> Result<HeaderMap, RegistryError> {
        let mut headers = self.auth_headers()?;
        for (name, value) in &request.headers {
            let value = HeaderValue::from_str(value).map_err(|_| RegistryError::InvalidRequest {
                message: format!("invalid value for header {name}: {value}"),
            })?;
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| RegistryError::InvalidRequest {
                message: format!("invalid header name {name}"),
            })?;
            headers.append(name, value);
        }
        Ok(headers)
    }
}

const fn to_reqwest(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Head => reqwest::Method::HEAD,
        Method::Post => reqwest::Method::POST,
        Method::Put => reqwest::Method::PUT,
        Method::Patch => reqwest::Method::PATCH,
        Method::Delete => reqwest::Method::DELETE,
    }
}

fn collect_headers(map: &HeaderMap) -> BTreeMap<String, String> {
    let mut headers: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in map {
        let Ok(value) = value.to_str() else {
            continue;
        };
        headers
            .entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    headers
}

#[async_trait]
impl RegistryApi for RegistryClient {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, RegistryError> {
        let url = self.resolve(&request.target)?;
        let headers = self.request_headers(&request)?;

        debug!(method = %request.method, url = %url, bytes = request.body.len(), "Sending request");

        let mut builder = self.http.request(to_reqwest(request.method), url).headers(headers);
        if !request.body.is_empty() || matches!(request.method, Method::Put | Method::Patch | Method::Post) {
            builder = builder.body(request.body);
        }

        let response = builder.send().await.map_err(|e| self.transport_error(e))?;
        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());
        let body = response.bytes().await.map_err(|e| self.transport_error(e))?.to_vec();

        debug!(status, bytes = body.len(), "Received response");

        Ok(ApiResponse { status, headers, body })
    }
}
