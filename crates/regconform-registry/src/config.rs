//! Configuration types for the registry client.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the registry client.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Registry host or URL (e.g., "localhost:5000" or "<https://registry.example.com>").
    pub url: String,

    /// Authentication configuration.
    pub auth: RegistryAuth,

    /// Whole-request timeout enforced by the HTTP client.
    pub timeout: Duration,

    /// Transport security.
    pub tls: TlsMode,

    /// Extra CA certificate to trust.
    pub ca_cert: Option<PathBuf>,

    /// User agent string.
    pub user_agent: String,
}

impl RegistryConfig {
    /// Creates a new registry configuration with the given host or URL.
    ///
    /// # Examples
    ///
    /// ```
    /// use regconform_registry::{RegistryConfig, TlsMode};
    ///
    /// let config = RegistryConfig::new("localhost:5000").with_tls(TlsMode::Disabled);
    /// assert_eq!(config.base_url(), "http://localhost:5000");
    /// ```
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth: RegistryAuth::None,
            timeout: Duration::from_secs(60),
            tls: TlsMode::Enabled,
            ca_cert: None,
            user_agent: format!("regconform/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Sets the authentication method.
    #[must_use]
    pub fn with_auth(mut self, auth: RegistryAuth) -> Self {
        self.auth = auth;
        self
    }

    /// Sets the request timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the TLS mode.
    #[must_use]
    pub const fn with_tls(mut self, tls: TlsMode) -> Self {
        self.tls = tls;
        self
    }

    /// Trusts an additional CA certificate.
    #[must_use]
    pub fn with_ca_cert(mut self, path: impl Into<PathBuf>) -> Self {
        self.ca_cert = Some(path.into());
        self
    }

    /// Returns the base URL, adding a scheme from the TLS mode when the
    /// configured value is a bare host.
    #[must_use]
    pub fn base_url(&self) -> String {
        let trimmed = self.url.trim_end_matches('/');
        if trimmed.contains("://") {
            trimmed.to_string()
        } else {
            format!("{}://{trimmed}", self.tls.scheme())
        }
    }
}

/// Authentication methods for registry access.
///
/// Credentials are sent as static headers; no token exchange is performed.
#[derive(Debug, Clone, Default)]
pub enum RegistryAuth {
    /// No authentication.
    #[default]
    None,

    /// Basic authentication (username/password or username/token).
    Basic {
        /// Username.
        username: String,
        /// Password or token.
        password: String,
    },

    /// Pre-issued bearer token.
    Bearer {
        /// Token value.
        token: String,
    },
}

impl RegistryAuth {
    /// Creates basic authentication.
    ///
    /// # Examples
    ///
    /// ```
    /// use regconform_registry::RegistryAuth;
    ///
    /// let auth = RegistryAuth::basic("user", "pass");
    /// ```
    #[must_use]
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Creates bearer token authentication.
    #[must_use]
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer {
            token: token.into(),
        }
    }
}

/// Transport security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// HTTPS with certificate verification.
    #[default]
    Enabled,
    /// HTTPS without certificate verification.
    Insecure,
    /// Plain HTTP.
    Disabled,
}

impl TlsMode {
    /// URL scheme for the mode.
    #[must_use]
    pub const fn scheme(self) -> &'static str {
        match self {
            Self::Enabled | Self::Insecure => "https",
            Self::Disabled => "http",
        }
    }

    /// Returns the string representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Enabled => "enabled",
            Self::Insecure => "insecure",
            Self::Disabled => "disabled",
        }
    }
}

impl fmt::Display for TlsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TlsMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "enabled" | "true" => Ok(Self::Enabled),
            "insecure" => Ok(Self::Insecure),
            "disabled" | "false" => Ok(Self::Disabled),
            _ => Err(format!("unknown TLS mode: {s}")),
        }
    }
}
