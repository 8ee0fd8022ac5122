//! The version-control port.
//!
//! Everything the library needs from git goes through [`VersionControlPort`].
//! [`GitCli`](super::cli::GitCli) drives the `git` executable; tests use an
//! in-memory fake.

use std::fmt::Debug;
use std::path::Path;

use crate::errors::KbError;

/// One entry of `git status --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// Index status letter (`X`).
    pub index: char,
    /// Working-tree status letter (`Y`).
    pub worktree: char,
    /// Path relative to the repository root, `/`-separated.
    pub path: String,
    /// Source path of a rename or copy.
    pub orig_path: Option<String>,
}

impl StatusEntry {
    /// Build an entry from the two-letter porcelain code.
    pub fn new(code: &str, path: impl Into<String>) -> Self {
        let mut chars = code.chars();
        Self {
            index: chars.next().unwrap_or(' '),
            worktree: chars.next().unwrap_or(' '),
            path: path.into(),
            orig_path: None,
        }
    }

    /// Attach the source path of a rename or copy.
    pub fn with_orig_path(mut self, orig: impl Into<String>) -> Self {
        self.orig_path = Some(orig.into());
        self
    }

    /// Whether this entry is an untracked file (`??`).
    pub fn is_untracked(&self) -> bool {
        self.index == '?' && self.worktree == '?'
    }
}

/// Operations the safety layer and the change collector need from a VCS.
///
/// All methods are blocking. Network methods (`fetch`, `push`) honor the
/// implementation's network timeout.
pub trait VersionControlPort: Send + Sync + Debug {
    /// Fail with [`KbError::RepositoryState`] unless `root` is the top level
    /// of a working tree.
    fn verify_repository(&self, root: &Path) -> Result<(), KbError>;

    /// Working-tree status, including every untracked file.
    fn status(&self) -> Result<Vec<StatusEntry>, KbError>;

    /// The checked-out branch, or `None` when HEAD is detached.
    fn current_branch(&self) -> Result<Option<String>, KbError>;

    /// Id of the commit HEAD points at.
    fn head_commit(&self) -> Result<String, KbError>;

    /// Whether the working tree or index differs from HEAD.
    fn is_dirty(&self) -> Result<bool, KbError> {
        Ok(!self.status()?.is_empty())
    }

    /// Stage the given root-relative paths.
    fn stage(&self, paths: &[&Path]) -> Result<(), KbError>;

    /// Stage every change in the working tree (`git add -A`).
    fn stage_all(&self) -> Result<(), KbError>;

    /// Whether the index differs from HEAD.
    fn has_staged_changes(&self) -> Result<bool, KbError>;

    /// Create a commit from the index and return its id.
    fn commit(&self, message: &str) -> Result<String, KbError>;

    /// Configured remote names.
    fn remotes(&self) -> Result<Vec<String>, KbError>;

    /// The fetch URL of a remote.
    fn remote_url(&self, remote: &str) -> Result<String, KbError>;

    /// Replace the URL of a remote.
    fn set_remote_url(&self, remote: &str, url: &str) -> Result<(), KbError>;

    /// Fetch all branches of a remote.
    fn fetch(&self, remote: &str) -> Result<(), KbError>;

    /// Whether `remote/branch` exists after the last fetch.
    fn remote_branch_exists(&self, remote: &str, branch: &str) -> Result<bool, KbError>;

    /// Fast-forward the current branch to `remote/branch`.
    fn merge_ff_only(&self, remote: &str, branch: &str) -> Result<(), KbError>;

    /// Push `branch` to `remote`. Never forces.
    fn push(&self, remote: &str, branch: &str, set_upstream: bool) -> Result<(), KbError>;

    /// Stash tracked and untracked changes.
    ///
    /// Returns the id of the created stash commit, or `None` if there was
    /// nothing to stash.
    fn stash_push(&self, message: &str) -> Result<Option<String>, KbError>;

    /// Pop exactly the stash whose commit id is `token`.
    fn stash_pop(&self, token: &str) -> Result<(), KbError>;

    /// Whether a local branch exists.
    fn branch_exists(&self, branch: &str) -> Result<bool, KbError>;

    /// Create a local branch at HEAD without checking it out.
    fn create_branch(&self, branch: &str) -> Result<(), KbError>;

    /// Check out a branch, creating it from HEAD when `create` is set.
    ///
    /// Passing a commit id without `create` detaches HEAD at that commit.
    fn checkout(&self, branch: &str, create: bool) -> Result<(), KbError>;
}
