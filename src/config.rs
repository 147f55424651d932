// src/config.rs
//! Configuration file parsing
//!
//! Supports TOML configuration files with the following sections:
//! - `workspace` - Root directory for per-repository working trees
//! - [store] - Object-store backend, worker and retry settings
//! - [signing] - Notary client, key and token lookup
//! - [[repos]] - Repository definitions

use crate::error::{Error, Result};
use crate::store::{FilesystemConnector, MemoryConnector, StoreConnector};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use url::Url;

/// Package format of a repository
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageFormat {
    Rpm,
    Deb,
}

impl PackageFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            PackageFormat::Rpm => "rpm",
            PackageFormat::Deb => "deb",
        }
    }
}

impl fmt::Display for PackageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "rpm" => Ok(PackageFormat::Rpm),
            "deb" => Ok(PackageFormat::Deb),
            other => Err(Error::UnsupportedFormat(other.to_string())),
        }
    }
}

/// TOML configuration file structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RepositoryConfig {
    /// Root for local working directories (defaults to the current directory)
    #[serde(default)]
    pub workspace: Option<PathBuf>,

    #[serde(default)]
    pub store: StoreSection,

    #[serde(default)]
    pub signing: SigningConfig,

    #[serde(default)]
    pub repos: Vec<RepositoryDefinition>,
}

impl RepositoryConfig {
    /// Load, validate and resolve signing tokens from the environment
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read config file {}: {}", path.display(), e))
        })?;

        let mut config = Self::from_toml_str(&content)
            .map_err(|e| e.context(format!("config file {}", path.display())))?;
        config.signing.resolve_tokens();
        Ok(config)
    }

    /// Parse and validate TOML; tokens are left unresolved
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.store.validate()?;
        self.signing.validate()?;

        let mut names = HashSet::new();
        for repo in &self.repos {
            repo.validate()?;
            if !names.insert(repo.name.as_str()) {
                return Err(Error::ConfigError(format!(
                    "Repository '{}' is defined more than once",
                    repo.name
                )));
            }
        }
        Ok(())
    }

    pub fn find_repo(&self, name: &str) -> Result<&RepositoryDefinition> {
        self.repos
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| Error::ConfigError(format!("No repository named '{}' is configured", name)))
    }

    /// Configured workspace, or the current directory
    pub fn workspace_dir(&self) -> Result<PathBuf> {
        match &self.workspace {
            Some(dir) => Ok(dir.clone()),
            None => std::env::current_dir().map_err(|e| {
                Error::IoError(format!("Failed to determine the current directory: {}", e))
            }),
        }
    }
}

/// Object-store backend kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    S3,
    Filesystem,
    Memory,
}

/// Store configuration section
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreSection {
    #[serde(default)]
    pub backend: StoreBackend,

    #[serde(default = "default_region")]
    pub region: String,

    /// Custom endpoint for S3-compatible services
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Address buckets as `<endpoint>/<bucket>` instead of by subdomain
    #[serde(default)]
    pub path_style: bool,

    /// Directory holding buckets for the filesystem backend
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// Transfer workers per bucket handle
    #[serde(default = "default_jobs")]
    pub jobs: usize,

    /// Attempts per remote call
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Credential profile used when a job does not name one
    #[serde(default)]
    pub profile: Option<String>,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            region: default_region(),
            endpoint: None,
            path_style: false,
            root: None,
            jobs: default_jobs(),
            retries: default_retries(),
            profile: None,
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_jobs() -> usize {
    crate::store::DEFAULT_JOBS
}

fn default_retries() -> u32 {
    crate::store::DEFAULT_ATTEMPTS
}

impl StoreSection {
    pub fn validate(&self) -> Result<()> {
        if let Some(endpoint) = &self.endpoint {
            Url::parse(endpoint).map_err(|e| {
                Error::ConfigError(format!("Invalid store.endpoint '{}': {}", endpoint, e))
            })?;
        }
        if self.jobs == 0 {
            return Err(Error::ConfigError("store.jobs must be at least 1".to_string()));
        }
        if self.retries == 0 {
            return Err(Error::ConfigError("store.retries must be at least 1".to_string()));
        }
        if self.backend == StoreBackend::Filesystem && self.root.is_none() {
            return Err(Error::ConfigError(
                "store.root is required for the filesystem backend".to_string(),
            ));
        }
        Ok(())
    }

    /// Build a connector; `profile` overrides the configured credential profile
    pub fn connector(&self, profile: Option<&str>) -> Result<Arc<dyn StoreConnector>> {
        match self.backend {
            StoreBackend::S3 => self.s3_connector(profile.or(self.profile.as_deref())),
            StoreBackend::Filesystem => {
                let root = self.root.as_ref().ok_or_else(|| {
                    Error::ConfigError("store.root is required for the filesystem backend".to_string())
                })?;
                Ok(Arc::new(FilesystemConnector::new(root.clone())))
            }
            StoreBackend::Memory => Ok(Arc::new(MemoryConnector::new())),
        }
    }

    #[cfg(feature = "s3")]
    fn s3_connector(&self, profile: Option<&str>) -> Result<Arc<dyn StoreConnector>> {
        let connector = crate::store::S3Connector::new(
            &self.region,
            self.endpoint.as_deref(),
            self.path_style,
            profile,
        )?;
        Ok(Arc::new(connector))
    }

    #[cfg(not(feature = "s3"))]
    fn s3_connector(&self, _profile: Option<&str>) -> Result<Arc<dyn StoreConnector>> {
        Err(Error::ConfigError(
            "pkgrelay was built without the s3 feature".to_string(),
        ))
    }
}

/// Signing configuration section
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SigningConfig {
    /// Notary service the client talks to
    #[serde(default)]
    pub notary_url: Option<String>,

    /// Signing client command
    #[serde(default = "default_client")]
    pub client: String,

    /// Environment variable holding the default auth token
    #[serde(default = "default_token_env")]
    pub token_env: String,

    /// Environment variable holding the legacy DEB auth token
    #[serde(default = "default_legacy_token_env")]
    pub legacy_token_env: String,

    /// Key used for the legacy DEB series
    #[serde(default)]
    pub legacy_key_name: Option<String>,

    /// DEB release series still signed with the legacy key
    #[serde(default = "default_legacy_deb_series")]
    pub legacy_deb_series: Vec<String>,

    /// Comment attached to signing requests
    #[serde(default)]
    pub comment: Option<String>,

    /// Default auth token, resolved from `token_env`
    #[serde(skip)]
    pub token: Option<String>,

    /// Legacy auth token, resolved from `legacy_token_env`
    #[serde(skip)]
    pub legacy_token: Option<String>,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            notary_url: None,
            client: default_client(),
            token_env: default_token_env(),
            legacy_token_env: default_legacy_token_env(),
            legacy_key_name: None,
            legacy_deb_series: default_legacy_deb_series(),
            comment: None,
            token: None,
            legacy_token: None,
        }
    }
}

fn default_client() -> String {
    "notary-client.py".to_string()
}

fn default_token_env() -> String {
    "NOTARY_TOKEN".to_string()
}

fn default_legacy_token_env() -> String {
    "NOTARY_TOKEN_DEB_LEGACY".to_string()
}

fn default_legacy_deb_series() -> Vec<String> {
    vec!["3.0".to_string(), "2.6".to_string()]
}

impl SigningConfig {
    pub fn validate(&self) -> Result<()> {
        if let Some(url) = &self.notary_url {
            Url::parse(url).map_err(|e| {
                Error::ConfigError(format!("Invalid signing.notary_url '{}': {}", url, e))
            })?;
        }
        if self.client.trim().is_empty() {
            return Err(Error::ConfigError("signing.client must not be empty".to_string()));
        }
        Ok(())
    }

    /// Fill unset tokens from their environment variables
    ///
    /// Empty variables count as unset.
    pub fn resolve_tokens(&mut self) {
        fn from_env(name: &str) -> Option<String> {
            std::env::var(name).ok().filter(|v| !v.is_empty())
        }

        if self.token.is_none() {
            self.token = from_env(&self.token_env);
        }
        if self.legacy_token.is_none() {
            self.legacy_token = from_env(&self.legacy_token_env);
        }
    }

    /// Whether a DEB release series is signed with the legacy key
    pub fn is_legacy_series(&self, series: &str) -> bool {
        self.legacy_deb_series.iter().any(|s| s == series)
    }
}

/// One package distribution target
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RepositoryDefinition {
    pub name: String,

    #[serde(rename = "type")]
    pub format: PackageFormat,

    /// Bucket holding the repository
    pub bucket: String,

    /// Remote repository prefixes processed by each build
    pub repos: Vec<String>,

    /// DEB component packages are published to
    #[serde(default = "default_component")]
    pub component: String,

    /// Build architecture to repository architecture
    #[serde(default)]
    pub architectures: BTreeMap<String, String>,
}

fn default_component() -> String {
    "main".to_string()
}

impl RepositoryDefinition {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::ConfigError("Repository name must not be empty".to_string()));
        }
        if self.bucket.trim().is_empty() {
            return Err(Error::ConfigError(format!(
                "Repository '{}' has no bucket",
                self.name
            )));
        }
        if self.repos.is_empty() {
            return Err(Error::ConfigError(format!(
                "Repository '{}' lists no remote repositories",
                self.name
            )));
        }
        Ok(())
    }

    /// Repository architecture for a build architecture; unmapped names pass through
    pub fn arch_for(&self, arch: &str) -> String {
        self.architectures
            .get(arch)
            .cloned()
            .unwrap_or_else(|| arch.to_string())
    }
}
