//! Repository handle and path safety.
//!
//! This module provides the [`Repository`] type: a knowledge-base working
//! tree together with its resolved configuration, its version-control port
//! and the lock that serializes mutating operations.

use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::SyncConfig;
use crate::constants::DEFAULT_BRANCH;
use crate::errors::KbError;
use crate::git::cli::GitCli;
use crate::git::credentials::HttpsCredentials;
use crate::git::port::VersionControlPort;
use crate::git::safety::GitSafety;
use crate::lock::RepositoryLock;

// ============================================================================
// Helper Functions
// ============================================================================

/// Check if a path is a disk root (e.g., C:\ on Windows, / on Unix).
///
/// A knowledge base at a filesystem root would let the fixer walk and
/// rewrite the entire system.
pub(crate) fn is_disk_root(path: &Path) -> bool {
    if path.parent().is_some() {
        return false;
    }

    #[cfg(windows)]
    {
        if let Some(s) = path.to_str() {
            if s.len() >= 2 && s.chars().nth(1) == Some(':') {
                return true;
            }
        }
    }

    #[cfg(not(windows))]
    {
        if path == Path::new("/") {
            return true;
        }
    }

    path.canonicalize().ok().map_or(false, |p| p.parent().is_none())
}

/// Lexically normalize a path: drop `.` and fold `..` into its parent.
///
/// Returns `None` when `..` climbs above the first component.
pub fn normalize_lexically(path: &Path) -> Option<PathBuf> {
    let mut out = PathBuf::new();
    let mut depth = 0usize;

    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir => out.push(component.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return None;
                }
                out.pop();
                depth -= 1;
            }
            Component::Normal(name) => {
                out.push(name);
                depth += 1;
            }
        }
    }

    Some(out)
}

// ============================================================================
// Repository
// ============================================================================

/// A knowledge-base repository.
///
/// Long-lived: one value is reused across sync calls, and several
/// repositories can coexist in one process. All file access that goes
/// through a `Repository` is confined to its root.
///
/// # Example
///
/// ```ignore
/// use kbsync_core::{Repository, SyncConfig};
///
/// let repo = Repository::open(Path::new("/srv/kb"), SyncConfig::default())?;
/// let session = repo.session()?;
/// ```
#[derive(Debug)]
pub struct Repository {
    /// Canonical root of the working tree.
    root: PathBuf,

    /// Resolved configuration.
    settings: SyncConfig,

    /// Git access.
    vcs: Box<dyn VersionControlPort>,

    /// Serializes mutating operations.
    lock: RepositoryLock,
}

impl Repository {
    /// Open the git working tree at `root`.
    ///
    /// # Errors
    ///
    /// - [`KbError::RepositoryState`] if the path does not exist, is a disk
    ///   root, or is not the top level of a git working tree.
    pub fn open(root: &Path, settings: SyncConfig) -> Result<Self, KbError> {
        let root = Self::canonical_root(root)?;
        let vcs = GitCli::new(&root, settings.network_timeout, settings.local_timeout);
        Self::with_port(&root, settings, Box::new(vcs))
    }

    /// Open a repository with an explicit version-control port.
    pub fn with_port(
        root: &Path,
        settings: SyncConfig,
        vcs: Box<dyn VersionControlPort>,
    ) -> Result<Self, KbError> {
        let root = Self::canonical_root(root)?;
        vcs.verify_repository(&root)?;
        let lock = RepositoryLock::for_repository(&root);

        tracing::debug!("Opened repository at {}", root.display());
        Ok(Self {
            root,
            settings,
            vcs,
            lock,
        })
    }

    fn canonical_root(root: &Path) -> Result<PathBuf, KbError> {
        let canonical = root.canonicalize().map_err(|e| KbError::RepositoryState {
            path: root.to_path_buf(),
            reason: format!("cannot access directory: {}", e),
        })?;

        if !canonical.is_dir() {
            return Err(KbError::RepositoryState {
                path: canonical,
                reason: "not a directory".to_string(),
            });
        }

        if is_disk_root(&canonical) {
            return Err(KbError::RepositoryState {
                path: canonical,
                reason: "refusing to manage a disk root as a knowledge base".to_string(),
            });
        }

        Ok(canonical)
    }

    /// Absolute, canonical root of the working tree.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolved configuration.
    pub fn settings(&self) -> &SyncConfig {
        &self.settings
    }

    /// Default remote name.
    pub fn default_remote(&self) -> &str {
        &self.settings.remote
    }

    /// Default branch, if one is configured.
    pub fn default_branch(&self) -> Option<&BranchName> {
        self.settings.branch.as_ref()
    }

    /// HTTPS credentials, if configured.
    pub fn credentials(&self) -> Option<HttpsCredentials> {
        self.settings.credentials()
    }

    pub(crate) fn vcs(&self) -> &dyn VersionControlPort {
        self.vcs.as_ref()
    }

    /// Acquire the repository lock and open a session.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::LockUnavailable`] if the lock cannot be acquired
    /// within the configured lock timeout.
    pub fn session(&self) -> Result<GitSafety<'_>, KbError> {
        let guard = self.lock.acquire(self.settings.lock_timeout)?;
        Ok(GitSafety::new(self, guard))
    }

    /// Resolve `path` to an absolute path that lies inside the root.
    ///
    /// Relative paths are taken relative to the root. `..` segments are
    /// folded lexically, then the deepest existing ancestor is canonicalized
    /// so that symlinks pointing out of the tree are caught too.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::PathTraversal`] before touching anything when the
    /// path escapes the root.
    pub fn resolve_inside(&self, path: &Path) -> Result<PathBuf, KbError> {
        let traversal = || KbError::PathTraversal {
            path: path.to_path_buf(),
            root: self.root.clone(),
        };

        let joined = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        };
        let normalized = normalize_lexically(&joined).ok_or_else(traversal)?;
        if !normalized.starts_with(&self.root) {
            return Err(traversal());
        }

        let mut existing = normalized.as_path();
        let mut rest = Vec::new();
        while !existing.exists() {
            match (existing.parent(), existing.file_name()) {
                (Some(parent), Some(name)) => {
                    rest.push(name.to_os_string());
                    existing = parent;
                }
                _ => break,
            }
        }

        let mut resolved = existing.canonicalize().map_err(|_| traversal())?;
        if !resolved.starts_with(&self.root) {
            return Err(traversal());
        }
        for name in rest.into_iter().rev() {
            resolved.push(name);
        }

        Ok(resolved)
    }

    /// Path of `absolute` relative to the root, `/`-separated.
    pub fn relative(&self, absolute: &Path) -> Option<String> {
        absolute
            .strip_prefix(&self.root)
            .ok()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
    }

    /// Read a text file inside the repository.
    pub fn read_file(&self, path: &Path) -> Result<String, KbError> {
        let resolved = self.resolve_inside(path)?;
        if !resolved.is_file() {
            return Err(KbError::FileNotFound(path.to_path_buf()));
        }
        Ok(fs::read_to_string(resolved)?)
    }

    /// Overwrite a text file inside the repository.
    pub fn write_file(&self, path: &Path, contents: &str) -> Result<(), KbError> {
        let resolved = self.resolve_inside(path)?;
        fs::write(resolved, contents)?;
        Ok(())
    }
}

// ============================================================================
// BranchName
// ============================================================================

/// A git branch name.
///
/// # Validation Rules
///
/// Valid branch names:
/// - Must be non-empty
/// - Can only contain alphanumeric characters, hyphens (`-`), underscores
///   (`_`), periods (`.`) and forward slashes (`/`)
/// - Cannot start or end with a slash, or contain `//` or `..`
/// - Cannot start with `-` or end with `.lock`
///
/// # Example
///
/// ```
/// use kbsync_core::BranchName;
///
/// assert!(BranchName::try_new("main").is_ok());
/// assert!(BranchName::try_new("agents/researcher").is_ok());
///
/// assert!(BranchName::try_new("").is_err());
/// assert!(BranchName::try_new("branch with spaces").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchName(String);

impl BranchName {
    /// Create a new branch name with validation.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::InvalidBranchName`] if the name is not acceptable.
    pub fn try_new(name: impl Into<String>) -> Result<Self, KbError> {
        let name = name.into();
        if is_valid_branch_name(&name) {
            Ok(Self(name))
        } else {
            Err(KbError::InvalidBranchName(name))
        }
    }

    /// Get the default branch name (`main`).
    pub fn default_branch() -> Self {
        Self(DEFAULT_BRANCH.to_string())
    }

    /// Get the branch name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Check if a string is a valid branch name.
pub fn is_valid_branch_name(name: &str) -> bool {
    if name.is_empty() || name == "HEAD" {
        return false;
    }

    if name.starts_with('/') || name.ends_with('/') || name.starts_with('-') {
        return false;
    }

    if name.contains("//") || name.contains("..") || name.ends_with(".lock") || name.ends_with('.') {
        return false;
    }

    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '/' || c == '.')
}

impl std::fmt::Display for BranchName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for BranchName {
    fn default() -> Self {
        Self::default_branch()
    }
}

impl AsRef<str> for BranchName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for BranchName {
    type Err = KbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_new(s)
    }
}

// ============================================================================
// Tests
// ============================================================================
