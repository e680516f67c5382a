//! Runner configuration.
//!
//! Values come from a YAML file with defaults for every field, then an
//! overlay of `OCI_*` environment variables, then command-line flags applied
//! by the caller.

use std::fs;
use std::path::Path;
use std::time::Duration;

use regconform_core::{ApiToggles, DataShape};
use regconform_registry::{RegistryAuth, RegistryConfig, TlsMode};
use serde::{Deserialize, Serialize};

use crate::error::{Result, RunnerError};

/// Which data shapes to generate and run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
#[allow(clippy::struct_excessive_bools)]
pub struct DataToggles {
    /// Single-platform image.
    pub image: bool,
    /// Multi-platform index.
    pub index: bool,
    /// Index with an unpushed child.
    pub sparse_index: bool,
    /// Artifact manifest.
    pub artifact: bool,
    /// Image with referrers.
    pub artifact_with_subject: bool,
    /// Artifact whose subject does not exist.
    pub artifact_with_missing_subject: bool,
    /// Index of an index.
    pub nested_index: bool,
}

impl Default for DataToggles {
    fn default() -> Self {
        Self {
            image: true,
            index: true,
            sparse_index: true,
            artifact: true,
            artifact_with_subject: true,
            artifact_with_missing_subject: true,
            nested_index: true,
        }
    }
}

impl DataToggles {
    /// Only the given shapes enabled.
    #[must_use]
    pub fn only(shapes: &[DataShape]) -> Self {
        let mut toggles = Self::none();
        for shape in shapes {
            *toggles.slot(*shape) = true;
        }
        toggles
    }

    /// Every shape disabled.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            image: false,
            index: false,
            sparse_index: false,
            artifact: false,
            artifact_with_subject: false,
            artifact_with_missing_subject: false,
            nested_index: false,
        }
    }

    /// Returns whether `shape` is enabled.
    #[must_use]
    pub const fn enabled(&self, shape: DataShape) -> bool {
        match shape {
            DataShape::Image => self.image,
            DataShape::Index => self.index,
            DataShape::SparseIndex => self.sparse_index,
            DataShape::Artifact => self.artifact,
            DataShape::ArtifactWithSubject => self.artifact_with_subject,
            DataShape::ArtifactWithMissingSubject => self.artifact_with_missing_subject,
            DataShape::NestedIndex => self.nested_index,
        }
    }

    /// Enabled shapes in run order.
    #[must_use]
    pub fn shapes(&self) -> Vec<DataShape> {
        DataShape::ALL
            .into_iter()
            .filter(|s| self.enabled(*s))
            .collect()
    }

    fn slot(&mut self, shape: DataShape) -> &mut bool {
        match shape {
            DataShape::Image => &mut self.image,
            DataShape::Index => &mut self.index,
            DataShape::SparseIndex => &mut self.sparse_index,
            DataShape::Artifact => &mut self.artifact,
            DataShape::ArtifactWithSubject => &mut self.artifact_with_subject,
            DataShape::ArtifactWithMissingSubject => &mut self.artifact_with_missing_subject,
            DataShape::NestedIndex => &mut self.nested_index,
        }
    }
}

/// Configuration for a conformance run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Registry host or URL.
    pub registry: String,

    /// Transport security.
    pub tls: TlsMode,

    /// Repository the datasets are pushed to.
    pub repo1: String,

    /// Repository blobs are mounted into.
    pub repo2: String,

    /// Basic auth user name.
    pub username: Option<String>,

    /// Basic auth password.
    #[serde(skip_serializing)]
    pub password: Option<String>,

    /// Operation groups to exercise.
    pub api: ApiToggles,

    /// Data shapes to run.
    pub data: DataToggles,

    /// Chunk size for chunked uploads, in bytes.
    pub chunk_size: usize,

    /// Per-call deadline in seconds. `None` disables it.
    pub timeout_secs: Option<u64>,

    /// Run datasets concurrently.
    pub parallel: bool,

    /// Seed for reproducible content.
    pub seed: Option<u64>,

    /// Page size for tag listing.
    pub tag_page_size: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            registry: "localhost:5000".to_string(),
            tls: TlsMode::Enabled,
            repo1: "conformance/repo1".to_string(),
            repo2: "conformance/repo2".to_string(),
            username: None,
            password: None,
            api: ApiToggles::default(),
            data: DataToggles::default(),
            chunk_size: 256,
            timeout_secs: Some(60),
            parallel: false,
            seed: None,
            tag_page_size: 10,
        }
    }
}

type Setter = fn(&mut RunnerConfig, &str) -> std::result::Result<(), String>;

/// Environment keys and how each applies to the configuration.
pub const ENV_OVERLAY: &[(&str, Setter)] = &[
    ("OCI_REGISTRY", |c, v| {
        c.registry = v.to_string();
        Ok(())
    }),
    ("OCI_TLS", |c, v| {
        c.tls = v.parse()?;
        Ok(())
    }),
    ("OCI_REPO1", |c, v| {
        c.repo1 = v.to_string();
        Ok(())
    }),
    ("OCI_REPO2", |c, v| {
        c.repo2 = v.to_string();
        Ok(())
    }),
    ("OCI_USERNAME", |c, v| {
        c.username = Some(v.to_string());
        Ok(())
    }),
    ("OCI_PASSWORD", |c, v| {
        c.password = Some(v.to_string());
        Ok(())
    }),
    ("OCI_API_PUSH", |c, v| set_bool(&mut c.api.push, v)),
    ("OCI_API_PULL", |c, v| set_bool(&mut c.api.pull, v)),
    ("OCI_API_TAGS", |c, v| set_bool(&mut c.api.tags, v)),
    ("OCI_API_REFERRER", |c, v| set_bool(&mut c.api.referrer, v)),
    ("OCI_API_DELETE_TAG", |c, v| set_bool(&mut c.api.delete_tag, v)),
    ("OCI_API_DELETE_MANIFEST", |c, v| set_bool(&mut c.api.delete_manifest, v)),
    ("OCI_API_DELETE_BLOB", |c, v| set_bool(&mut c.api.delete_blob, v)),
    ("OCI_DATA_IMAGE", |c, v| set_bool(&mut c.data.image, v)),
    ("OCI_DATA_INDEX", |c, v| set_bool(&mut c.data.index, v)),
    ("OCI_DATA_SPARSE_INDEX", |c, v| set_bool(&mut c.data.sparse_index, v)),
    ("OCI_DATA_ARTIFACT", |c, v| set_bool(&mut c.data.artifact, v)),
    ("OCI_DATA_ARTIFACT_WITH_SUBJECT", |c, v| {
        set_bool(&mut c.data.artifact_with_subject, v)
    }),
    ("OCI_DATA_ARTIFACT_WITH_MISSING_SUBJECT", |c, v| {
        set_bool(&mut c.data.artifact_with_missing_subject, v)
    }),
    ("OCI_DATA_NESTED_INDEX", |c, v| set_bool(&mut c.data.nested_index, v)),
    ("OCI_CHUNK_SIZE", |c, v| {
        c.chunk_size = v.parse::<usize>().map_err(|e| e.to_string())?;
        Ok(())
    }),
    ("OCI_TIMEOUT_SECS", |c, v| {
        let secs = v.parse::<u64>().map_err(|e| e.to_string())?;
        c.timeout_secs = (secs > 0).then_some(secs);
        Ok(())
    }),
    ("OCI_PARALLEL", |c, v| set_bool(&mut c.parallel, v)),
];

fn set_bool(slot: &mut bool, value: &str) -> std::result::Result<(), String> {
    *slot = match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        other => return Err(format!("expected a boolean, got '{other}'")),
    };
    Ok(())
}

impl RunnerConfig {
    /// Parses a YAML document. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::ConfigParse`] on invalid YAML.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Loads a YAML configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| RunnerError::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_yaml_str(&content)
    }

    /// Applies every `OCI_*` key `lookup` returns a value for.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Config`] naming the first key with an
    /// unparseable value.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        for (key, setter) in ENV_OVERLAY {
            if let Some(value) = lookup(key) {
                setter(self, &value).map_err(|e| RunnerError::config(format!("{key}: {e}")))?;
            }
        }
        Ok(())
    }

    /// Checks values the registry would otherwise trip over.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Config`] describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.registry.trim().is_empty() {
            return Err(RunnerError::config("registry must not be empty"));
        }
        for (field, repo) in [("repo1", &self.repo1), ("repo2", &self.repo2)] {
            if !is_repository_name(repo) {
                return Err(RunnerError::config(format!("{field} '{repo}' is not a valid repository name")));
            }
        }
        if self.repo1 == self.repo2 {
            return Err(RunnerError::config("repo1 and repo2 must differ"));
        }
        if self.chunk_size == 0 {
            return Err(RunnerError::config("chunk_size must be positive"));
        }
        if self.tag_page_size == 0 {
            return Err(RunnerError::config("tag_page_size must be positive"));
        }
        if self.password.is_some() && self.username.is_none() {
            return Err(RunnerError::config("password set without username"));
        }
        Ok(())
    }

    /// Per-call deadline.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Client configuration for the registry under test.
    #[must_use]
    pub fn registry_config(&self) -> RegistryConfig {
        let auth = match &self.username {
            Some(user) => RegistryAuth::basic(user.clone(), self.password.clone().unwrap_or_default()),
            None => RegistryAuth::None,
        };
        let mut config = RegistryConfig::new(self.registry.clone())
            .with_tls(self.tls)
            .with_auth(auth);
        if let Some(timeout) = self.timeout() {
            config = config.with_timeout(timeout);
        }
        config
    }
}

/// Path components of lowercase alphanumerics separated by `.`, `_`, `__`
/// or runs of `-`, joined by `/`.
fn is_repository_name(name: &str) -> bool {
    !name.is_empty()
        && name.split('/').all(|component| {
            let bytes = component.as_bytes();
            !component.is_empty()
                && bytes.first().is_some_and(u8::is_ascii_alphanumeric)
                && bytes.last().is_some_and(u8::is_ascii_alphanumeric)
                && bytes
                    .iter()
                    .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(*b, b'.' | b'_' | b'-'))
                && !component.contains("..")
                && !component.contains("___")
        })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = RunnerConfig::default();
        assert_eq!(config.chunk_size, 256);
        assert_eq!(config.timeout(), Some(Duration::from_secs(60)));
        assert!(!config.parallel);
        assert_eq!(config.data.shapes().len(), DataShape::ALL.len());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_partial_document() {
        let yaml = r"
registry: registry.example.com
tls: insecure
api:
  referrer: false
data:
  nested_index: false
chunk_size: 1024
";
        let config = RunnerConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.registry, "registry.example.com");
        assert_eq!(config.tls, TlsMode::Insecure);
        assert!(!config.api.referrer);
        assert!(config.api.push);
        assert!(!config.data.enabled(DataShape::NestedIndex));
        assert!(config.data.enabled(DataShape::Image));
        assert_eq!(config.chunk_size, 1024);
        assert_eq!(config.repo1, "conformance/repo1");
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "repo1: team/one\nrepo2: team/two\nparallel: true").unwrap();

        let config = RunnerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.repo1, "team/one");
        assert!(config.parallel);
    }

    #[test]
    fn test_from_missing_file() {
        let err = RunnerConfig::from_file("/nonexistent/regconform.yaml").unwrap_err();
        assert!(matches!(err, RunnerError::ConfigRead { .. }));
    }

    #[test]
    fn test_env_overlay() {
        let mut config = RunnerConfig::default();
        config
            .apply_env(env(&[
                ("OCI_REGISTRY", "127.0.0.1:5000"),
                ("OCI_TLS", "disabled"),
                ("OCI_USERNAME", "ci"),
                ("OCI_PASSWORD", "secret"),
                ("OCI_API_DELETE_BLOB", "false"),
                ("OCI_DATA_SPARSE_INDEX", "0"),
                ("OCI_CHUNK_SIZE", "4096"),
                ("OCI_TIMEOUT_SECS", "0"),
                ("OCI_PARALLEL", "yes"),
            ]))
            .unwrap();

        assert_eq!(config.registry, "127.0.0.1:5000");
        assert_eq!(config.tls, TlsMode::Disabled);
        assert!(!config.api.delete_blob);
        assert!(!config.data.sparse_index);
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.timeout(), None);
        assert!(config.parallel);
        assert!(matches!(
            config.registry_config().auth,
            RegistryAuth::Basic { ref username, ref password } if username == "ci" && password == "secret"
        ));
    }

    #[test]
    fn test_env_overlay_rejects_bad_value() {
        let mut config = RunnerConfig::default();
        let err = config.apply_env(env(&[("OCI_API_PULL", "maybe")])).unwrap_err();
        assert!(err.to_string().contains("OCI_API_PULL"));
    }

    #[test]
    fn test_every_env_key_is_unique() {
        let mut keys: Vec<&str> = ENV_OVERLAY.iter().map(|(k, _)| *k).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), ENV_OVERLAY.len());
    }

    #[test]
    fn test_validate() {
        let config = RunnerConfig {
            repo2: "conformance/repo1".to_string(),
            ..RunnerConfig::default()
        };
        assert!(config.validate().is_err());

        let config = RunnerConfig {
            repo1: "Upper/Case".to_string(),
            ..RunnerConfig::default()
        };
        assert!(config.validate().is_err());

        let config = RunnerConfig {
            chunk_size: 0,
            ..RunnerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_repository_names() {
        assert!(is_repository_name("library/alpine"));
        assert!(is_repository_name("a/b-c/d_e.f"));
        assert!(!is_repository_name(""));
        assert!(!is_repository_name("a//b"));
        assert!(!is_repository_name("-a"));
        assert!(!is_repository_name("a/B"));
    }

    #[test]
    fn test_data_toggles_only() {
        let toggles = DataToggles::only(&[DataShape::Artifact, DataShape::Index]);
        assert_eq!(toggles.shapes(), vec![DataShape::Index, DataShape::Artifact]);
    }
}
