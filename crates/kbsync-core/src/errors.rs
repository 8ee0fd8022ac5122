//! Error types for kbsync-core.
//!
//! Every failure the library can report is a variant of [`KbError`]. Reports
//! carry the flattened [`ErrorKind`] instead of the error itself so they can be
//! serialized and compared.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Domain-specific errors for kbsync operations.
#[derive(Error, Debug)]
pub enum KbError {
    // =========================================================================
    // Path safety
    // =========================================================================
    /// A path resolves outside the repository root.
    ///
    /// Always raised before any side effect takes place.
    #[error("Path `{path}` resolves outside the repository root `{root}`.")]
    PathTraversal {
        /// The offending path as given by the caller.
        path: PathBuf,
        /// The repository root.
        root: PathBuf,
    },

    /// A file that an operation needs does not exist.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    // =========================================================================
    // Repository state
    // =========================================================================
    /// The directory is not a usable git repository, or git reported an
    /// inconsistent state.
    #[error("Repository error at `{path}`: {reason}")]
    RepositoryState {
        /// Path of the repository (or candidate).
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// The working tree has uncommitted changes and the operation would
    /// otherwise discard or mix them.
    #[error("Working tree has uncommitted changes; refusing to {operation}.")]
    DirtyWorkingTree {
        /// The refused operation.
        operation: String,
    },

    /// HEAD points at a commit instead of a branch.
    #[error("HEAD is detached; `{operation}` requires a checked-out branch.")]
    DetachedHead {
        /// The refused operation.
        operation: String,
    },

    /// A branch switch did not land on the requested branch.
    #[error("Branch verification failed: expected `{expected}`, found `{actual}`.")]
    BranchVerification {
        /// Requested branch.
        expected: String,
        /// Branch actually checked out after the switch.
        actual: String,
    },

    /// Invalid branch name.
    #[error("Invalid branch name `{0}`: branch names must be non-empty and contain only alphanumeric characters, hyphens, underscores, periods, and forward slashes.")]
    InvalidBranchName(String),

    // =========================================================================
    // Remote errors
    // =========================================================================
    /// The named remote is not configured in the repository.
    #[error("Remote `{0}` is not configured.")]
    RemoteNotFound(String),

    /// The remote rejected our credentials (HTTPS or SSH).
    #[error("Authentication failed for remote `{remote}`: {reason}")]
    Authentication {
        /// The remote name.
        remote: String,
        /// Git's explanation, with credentials redacted.
        reason: String,
    },

    /// Local and remote history diverged; a human has to resolve it.
    #[error("Branch `{branch}` has diverged from `{remote}`; manual resolution required: {reason}")]
    DivergedBranch {
        /// The remote name.
        remote: String,
        /// The branch name.
        branch: String,
        /// Git's explanation.
        reason: String,
    },

    /// A network operation timed out or could not reach the remote.
    #[error("Network error during `{operation}`: {reason}")]
    Network {
        /// The git operation (`push`, `fetch`, …).
        operation: String,
        /// Timeout or connectivity details.
        reason: String,
    },

    // =========================================================================
    // Commit / stash errors
    // =========================================================================
    /// The index contains no staged changes.
    #[error("Nothing to commit: the index has no staged changes.")]
    NothingToCommit,

    /// Creating or restoring a stash failed.
    ///
    /// When `token` is set, the stash entry still exists and must be
    /// restored manually.
    #[error("Stash operation failed: {reason}{}", .token.as_ref().map(|t| format!(" (stash {} kept)", t)).unwrap_or_default())]
    StashFailure {
        /// What went wrong.
        reason: String,
        /// The stash that is still pending, if any.
        token: Option<String>,
    },

    // =========================================================================
    // Locking
    // =========================================================================
    /// The repository lock could not be acquired in time.
    #[error("Repository lock unavailable after {waited_ms} ms: {reason}")]
    LockUnavailable {
        /// How long the caller waited.
        waited_ms: u64,
        /// Why the lock was unavailable.
        reason: String,
    },

    // =========================================================================
    // Configuration
    // =========================================================================
    /// Global configuration file is invalid.
    #[error("Global config invalid: {0}")]
    InvalidGlobalConfig(String),

    /// Repository configuration is invalid.
    #[error("Project config invalid: {0}")]
    InvalidProjectConfig(String),

    /// A configuration value is invalid.
    #[error("Invalid configuration: {message}. {hint}")]
    InvalidConfiguration {
        /// Description of the invalid configuration.
        message: String,
        /// Actionable hint on how to fix it.
        hint: String,
    },

    // =========================================================================
    // Wrapped errors
    // =========================================================================
    /// A git command failed in a way that has no more specific kind.
    #[error("git {command} failed: {stderr}")]
    Git {
        /// The git subcommand (redacted).
        command: String,
        /// Trimmed stderr output.
        stderr: String,
    },

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A wrapped generic error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl KbError {
    /// The flattened kind of this error, as reported in [`crate::SyncReport`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PathTraversal { .. } => ErrorKind::PathTraversal,
            Self::FileNotFound(_) => ErrorKind::FileNotFound,
            Self::RepositoryState { .. } => ErrorKind::RepositoryState,
            Self::DirtyWorkingTree { .. } => ErrorKind::DirtyWorkingTree,
            Self::DetachedHead { .. } => ErrorKind::DetachedHead,
            Self::BranchVerification { .. } => ErrorKind::BranchVerification,
            Self::InvalidBranchName(_) => ErrorKind::InvalidBranchName,
            Self::RemoteNotFound(_) => ErrorKind::RemoteNotFound,
            Self::Authentication { .. } => ErrorKind::Authentication,
            Self::DivergedBranch { .. } => ErrorKind::DivergedBranch,
            Self::Network { .. } => ErrorKind::Network,
            Self::NothingToCommit => ErrorKind::NothingToCommit,
            Self::StashFailure { .. } => ErrorKind::StashFailure,
            Self::LockUnavailable { .. } => ErrorKind::LockUnavailable,
            Self::InvalidGlobalConfig(_)
            | Self::InvalidProjectConfig(_)
            | Self::InvalidConfiguration { .. } => ErrorKind::Configuration,
            Self::Git { .. } => ErrorKind::Git,
            Self::Io(_) | Self::Yaml(_) | Self::Other(_) => ErrorKind::Io,
        }
    }

    /// Whether retrying the same call later may succeed without human action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network { .. } | Self::LockUnavailable { .. }
        )
    }
}

/// Serializable error classification used in reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    PathTraversal,
    FileNotFound,
    RepositoryState,
    DirtyWorkingTree,
    DetachedHead,
    BranchVerification,
    InvalidBranchName,
    RemoteNotFound,
    Authentication,
    DivergedBranch,
    Network,
    NothingToCommit,
    StashFailure,
    LockUnavailable,
    Configuration,
    Git,
    Io,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::PathTraversal => "PathTraversalError",
            Self::FileNotFound => "FileNotFoundError",
            Self::RepositoryState => "RepositoryStateError",
            Self::DirtyWorkingTree => "DirtyWorkingTreeError",
            Self::DetachedHead => "DetachedHeadError",
            Self::BranchVerification => "BranchVerificationError",
            Self::InvalidBranchName => "InvalidBranchNameError",
            Self::RemoteNotFound => "RemoteNotFoundError",
            Self::Authentication => "AuthenticationError",
            Self::DivergedBranch => "DivergedBranchError",
            Self::Network => "NetworkError",
            Self::NothingToCommit => "NothingToCommitError",
            Self::StashFailure => "StashFailureError",
            Self::LockUnavailable => "LockUnavailableError",
            Self::Configuration => "ConfigurationError",
            Self::Git => "GitError",
            Self::Io => "IoError",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Tests
// ============================================================================
