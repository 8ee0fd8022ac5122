//! Configuration types for kbsync.
//!
//! Configuration is read from two YAML files and merged into one
//! [`SyncConfig`]:
//! - [`GlobalConfig`]: user-level settings stored in `~/.kbsync/config.yaml`
//! - [`ProjectConfig`]: repository overrides stored in `<root>/.kbsync/config.yaml`
//!
//! Credentials are only accepted from the global file (or from the caller);
//! a repository config can never inject a token into the remote URL.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretBox;
use serde::{Deserialize, Deserializer, Serialize};

use crate::constants::{
    CONFIG_FILENAME, DEFAULT_LOCAL_TIMEOUT_SECS, DEFAULT_LOCK_TIMEOUT_SECS,
    DEFAULT_NETWORK_TIMEOUT_SECS, DEFAULT_REMOTE, KBSYNC_DIR, KBSYNC_HOME_DIR,
};
use crate::errors::KbError;
use crate::git::credentials::HttpsCredentials;
use crate::repository::{is_valid_branch_name, BranchName};

/// A token held in memory without ever being printed.
pub type SecretToken = Arc<SecretBox<String>>;

fn deserialize_token<'de, D>(deserializer: D) -> Result<Option<SecretToken>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw
        .filter(|s| !s.trim().is_empty())
        .map(|s| Arc::new(SecretBox::new(Box::new(s)))))
}

fn default_network_timeout_secs() -> u64 {
    DEFAULT_NETWORK_TIMEOUT_SECS
}

fn default_local_timeout_secs() -> u64 {
    DEFAULT_LOCAL_TIMEOUT_SECS
}

fn default_lock_timeout_secs() -> u64 {
    DEFAULT_LOCK_TIMEOUT_SECS
}

fn default_remote() -> String {
    DEFAULT_REMOTE.to_string()
}

// ============================================================================
// GlobalConfig
// ============================================================================

/// Global (user-level) configuration for kbsync.
///
/// # Example YAML
///
/// ```yaml
/// git:
///   username: kb-bot
///   token: ghp_xxx
///   networkTimeoutSecs: 60
/// sync:
///   remote: origin
///   branch: main
/// links:
///   skipCodeBlocks: false
///   mediaDirs: [media]
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GlobalConfig {
    /// Git transport settings and credentials.
    #[serde(default)]
    pub git: GitSection,

    /// Sync defaults.
    #[serde(default)]
    pub sync: SyncSection,

    /// Link checking options.
    #[serde(default)]
    pub links: LinksSection,
}

impl GlobalConfig {
    /// Load the global configuration from `~/.kbsync/config.yaml`.
    ///
    /// If the file does not exist, returns defaults.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::InvalidGlobalConfig`] if the file exists but cannot be parsed.
    pub fn load_default() -> Result<Self, KbError> {
        match Self::default_path() {
            Some(path) => Self::from_path(&path),
            None => {
                tracing::debug!("Could not determine home directory, using default config");
                Ok(Self::default())
            }
        }
    }

    /// Load the global configuration from a specific path.
    ///
    /// If the file does not exist, returns defaults.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::InvalidGlobalConfig`] if the file exists but cannot be parsed.
    pub fn from_path(path: &Path) -> Result<Self, KbError> {
        if !path.exists() {
            tracing::debug!(
                "Global config not found at {}, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| {
            KbError::InvalidGlobalConfig(format!("Failed to read {}: {}", path.display(), e))
        })?;

        serde_yaml::from_str(&content).map_err(|e| {
            KbError::InvalidGlobalConfig(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Get the default global config directory (`~/.kbsync`).
    pub fn default_dir() -> Option<PathBuf> {
        dirs::home_dir().map(|h| h.join(KBSYNC_HOME_DIR))
    }

    /// Get the default global config file path (`~/.kbsync/config.yaml`).
    pub fn default_path() -> Option<PathBuf> {
        Self::default_dir().map(|d| d.join(CONFIG_FILENAME))
    }
}

/// Git transport settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitSection {
    /// Username injected into HTTPS remote URLs.
    #[serde(default)]
    pub username: Option<String>,

    /// Token injected into HTTPS remote URLs.
    #[serde(default, deserialize_with = "deserialize_token")]
    pub token: Option<SecretToken>,

    /// Timeout for `fetch`/`pull`/`push`.
    #[serde(default = "default_network_timeout_secs")]
    pub network_timeout_secs: u64,

    /// Timeout for local git commands.
    #[serde(default = "default_local_timeout_secs")]
    pub local_timeout_secs: u64,
}

impl Default for GitSection {
    fn default() -> Self {
        Self {
            username: None,
            token: None,
            network_timeout_secs: DEFAULT_NETWORK_TIMEOUT_SECS,
            local_timeout_secs: DEFAULT_LOCAL_TIMEOUT_SECS,
        }
    }
}

/// Sync defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSection {
    /// Remote pushed to by default.
    #[serde(default = "default_remote")]
    pub remote: String,

    /// Branch synced by default. `None` means "the current branch".
    #[serde(default)]
    pub branch: Option<String>,

    /// How long a sync waits for the repository lock.
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            remote: DEFAULT_REMOTE.to_string(),
            branch: None,
            lock_timeout_secs: DEFAULT_LOCK_TIMEOUT_SECS,
        }
    }
}

/// Link checking options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinksSection {
    /// Ignore references inside fenced code blocks.
    #[serde(default)]
    pub skip_code_blocks: bool,

    /// Designated media directories, relative to the repository root.
    ///
    /// When non-empty, an image that exists outside all of them is reported
    /// as `outsideRoot`.
    #[serde(default)]
    pub media_dirs: Vec<String>,
}

// ======================================================================
// ProjectConfig
// ======================================================================

/// Repository-level overrides stored in `<root>/.kbsync/config.yaml`.
///
/// ```yaml
/// sync:
///   branch: knowledge
/// links:
///   mediaDirs: [assets, media]
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    /// Sync overrides.
    #[serde(default)]
    pub sync: Option<SyncOverride>,

    /// Link checking overrides.
    #[serde(default)]
    pub links: Option<LinksOverride>,
}

/// Per-repository sync overrides. Unset fields inherit from global config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOverride {
    /// Override for `sync.remote`.
    pub remote: Option<String>,
    /// Override for `sync.branch`.
    pub branch: Option<String>,
    /// Override for `sync.lockTimeoutSecs`.
    pub lock_timeout_secs: Option<u64>,
}

/// Per-repository link overrides. Unset fields inherit from global config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinksOverride {
    /// Override for `links.skipCodeBlocks`.
    pub skip_code_blocks: Option<bool>,
    /// Override for `links.mediaDirs`.
    pub media_dirs: Option<Vec<String>>,
}

impl ProjectConfig {
    /// Load the project configuration for a repository root.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::InvalidProjectConfig`] if the file exists but cannot be parsed.
    pub fn load_from_repository(root: &Path) -> Result<Self, KbError> {
        Self::from_path(&Self::config_path_for_repository(root))
    }

    /// Load the project configuration from a specific path.
    ///
    /// If the file does not exist, returns a default configuration.
    pub fn from_path(path: &Path) -> Result<Self, KbError> {
        if !path.exists() {
            tracing::debug!(
                "Project config not found at {}, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| {
            KbError::InvalidProjectConfig(format!("Failed to read {}: {}", path.display(), e))
        })?;

        serde_yaml::from_str(&content).map_err(|e| {
            KbError::InvalidProjectConfig(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Get the config file path for a given repository root.
    pub fn config_path_for_repository(root: &Path) -> PathBuf {
        root.join(KBSYNC_DIR).join(CONFIG_FILENAME)
    }
}

// ============================================================================
// SyncConfig
// ============================================================================

/// Fully resolved configuration consumed by the library.
///
/// Resolution precedence (highest to lowest):
/// 1. Caller overrides (CLI flags, environment variables)
/// 2. Project config (`<root>/.kbsync/config.yaml`)
/// 3. Global config (`~/.kbsync/config.yaml`)
/// 4. Built-in defaults
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Default remote.
    pub remote: String,
    /// Default branch; `None` syncs whatever branch is checked out.
    pub branch: Option<BranchName>,
    /// HTTPS username.
    pub username: Option<String>,
    /// HTTPS token.
    pub token: Option<SecretToken>,
    /// Timeout for network git operations.
    pub network_timeout: Duration,
    /// Timeout for local git operations.
    pub local_timeout: Duration,
    /// How long to wait for the repository lock.
    pub lock_timeout: Duration,
    /// Ignore references inside fenced code blocks.
    pub skip_code_blocks: bool,
    /// Designated media directories (relative to the root).
    pub media_dirs: Vec<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            remote: DEFAULT_REMOTE.to_string(),
            branch: None,
            username: None,
            token: None,
            network_timeout: Duration::from_secs(DEFAULT_NETWORK_TIMEOUT_SECS),
            local_timeout: Duration::from_secs(DEFAULT_LOCAL_TIMEOUT_SECS),
            lock_timeout: Duration::from_secs(DEFAULT_LOCK_TIMEOUT_SECS),
            skip_code_blocks: false,
            media_dirs: Vec::new(),
        }
    }
}

impl SyncConfig {
    /// Merge global and project configuration.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::InvalidConfiguration`] for zero timeouts or an
    /// invalid branch name.
    pub fn resolve(global: &GlobalConfig, project: &ProjectConfig) -> Result<Self, KbError> {
        let mut remote = global.sync.remote.clone();
        let mut branch = global.sync.branch.clone();
        let mut lock_timeout_secs = global.sync.lock_timeout_secs;
        let mut skip_code_blocks = global.links.skip_code_blocks;
        let mut media_dirs = global.links.media_dirs.clone();

        if let Some(ref sync) = project.sync {
            if let Some(ref r) = sync.remote {
                tracing::debug!("Project override: sync.remote = {}", r);
                remote = r.clone();
            }
            if let Some(ref b) = sync.branch {
                tracing::debug!("Project override: sync.branch = {}", b);
                branch = Some(b.clone());
            }
            if let Some(secs) = sync.lock_timeout_secs {
                tracing::debug!("Project override: sync.lockTimeoutSecs = {}", secs);
                lock_timeout_secs = secs;
            }
        }

        if let Some(ref links) = project.links {
            if let Some(skip) = links.skip_code_blocks {
                tracing::debug!("Project override: links.skipCodeBlocks = {}", skip);
                skip_code_blocks = skip;
            }
            if let Some(ref dirs) = links.media_dirs {
                tracing::debug!("Project override: links.mediaDirs = {:?}", dirs);
                media_dirs = dirs.clone();
            }
        }

        let config = Self {
            remote,
            branch: branch.map(BranchName::try_new).transpose().map_err(|e| {
                KbError::InvalidConfiguration {
                    message: e.to_string(),
                    hint: "Fix `sync.branch` in your config".to_string(),
                }
            })?,
            username: global.git.username.clone(),
            token: global.git.token.clone(),
            network_timeout: Duration::from_secs(global.git.network_timeout_secs),
            local_timeout: Duration::from_secs(global.git.local_timeout_secs),
            lock_timeout: Duration::from_secs(lock_timeout_secs),
            skip_code_blocks,
            media_dirs: media_dirs.into_iter().map(PathBuf::from).collect(),
        };

        for warning in config.validate()? {
            tracing::warn!("Config warning: {}", warning);
        }

        Ok(config)
    }

    /// Load and merge the default global config and the repository config.
    pub fn load(root: &Path, global_path: Option<&Path>) -> Result<Self, KbError> {
        let global = match global_path {
            Some(path) => GlobalConfig::from_path(path)?,
            None => GlobalConfig::load_default()?,
        };
        let project = ProjectConfig::load_from_repository(root)?;
        Self::resolve(&global, &project)
    }

    /// Validate the configuration, returning non-fatal warnings.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::InvalidConfiguration`] for values that make every
    /// sync fail.
    pub fn validate(&self) -> Result<Vec<String>, KbError> {
        let mut warnings = Vec::new();

        if self.network_timeout.is_zero() || self.local_timeout.is_zero() {
            return Err(KbError::InvalidConfiguration {
                message: "git timeouts must be greater than zero".to_string(),
                hint: "Set git.networkTimeoutSecs and git.localTimeoutSecs to at least 1"
                    .to_string(),
            });
        }

        if self.remote.trim().is_empty() {
            return Err(KbError::InvalidConfiguration {
                message: "sync.remote must not be empty".to_string(),
                hint: "Use the name of a configured remote, e.g. `origin`".to_string(),
            });
        }

        if let Some(ref branch) = self.branch {
            if !is_valid_branch_name(branch.as_str()) {
                return Err(KbError::InvalidBranchName(branch.to_string()));
            }
        }

        match (&self.username, &self.token) {
            (Some(_), None) => warnings
                .push("git.username is set without git.token; credentials will not be injected".to_string()),
            (None, Some(_)) => warnings
                .push("git.token is set without git.username; credentials will not be injected".to_string()),
            _ => {}
        }

        for dir in &self.media_dirs {
            if dir.is_absolute() || dir.components().any(|c| c == std::path::Component::ParentDir) {
                warnings.push(format!(
                    "links.mediaDirs entry `{}` is not a path inside the repository; it will never match",
                    dir.display()
                ));
            }
        }

        Ok(warnings)
    }

    /// Override the credentials (CLI flags or environment variables).
    pub fn with_credentials(mut self, username: Option<String>, token: Option<String>) -> Self {
        if let Some(username) = username.filter(|u| !u.trim().is_empty()) {
            self.username = Some(username);
        }
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            self.token = Some(Arc::new(SecretBox::new(Box::new(token))));
        }
        self
    }

    /// The HTTPS credentials, when both username and token are configured.
    pub fn credentials(&self) -> Option<HttpsCredentials> {
        match (&self.username, &self.token) {
            (Some(username), Some(token)) => {
                Some(HttpsCredentials::new(username.clone(), token.clone()))
            }
            _ => None,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
