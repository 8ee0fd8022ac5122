//! # kbsync-core
//!
//! **Knowledge base sync** – link integrity and git safety library.
//!
//! This crate keeps a markdown knowledge base healthy while automated agents
//! commit to it: it repairs image and link references that point at moved
//! files, and it wraps every git mutation in a locked, stash-protected
//! session. It is designed to be consumed by the `kbsync` CLI and other
//! Rust tools.
//!
//! ## Main Types
//!
//! - [`SyncEngine`] – validate, fix, commit and push in one call
//! - [`Repository`] – a resolved repository root with its settings
//! - [`GitSafety`] – the locked session all git mutations go through
//! - [`KbError`] – domain-specific error type
//!
//! ## Modules
//!
//! - [`config`] – configuration types (GlobalConfig, ProjectConfig, SyncConfig)
//! - [`reference`] – markdown reference parsing, resolution and repair
//! - [`changeset`] – change detection from git status
//! - [`git`] – the git port, its CLI backend and the safety layer
//! - [`sync`] – the sync orchestrator
//! - [`report`] – serializable results
//!
//! ## Example
//!
//! ```ignore
//! use kbsync_core::{Repository, SyncConfig, SyncEngine};
//! use std::path::Path;
//!
//! let root = Path::new("/srv/kb");
//! let settings = SyncConfig::load(root, None)?;
//! let repo = Repository::open(root, settings)?;
//!
//! let report = SyncEngine::new().auto_commit_and_push(&repo, "agent notes", None, None);
//! println!("{} files touched, success: {}", report.files_touched(), report.success);
//! ```

// Modules
pub mod changeset;
pub mod config;
pub mod constants;
pub mod errors;
pub mod git;
pub mod lock;
pub mod reference;
pub mod report;
pub mod repository;
pub mod sync;

// Re-exports for convenience
pub use changeset::{
    changes_from_status, collect_all_markdown, collect_changes, ChangeKind, ChangeRecord,
};
pub use config::{GlobalConfig, ProjectConfig, SyncConfig};
pub use constants::{should_ignore_dir, BROKEN_REFERENCE_MARKER, DEFAULT_BRANCH, DEFAULT_REMOTE};
pub use errors::{ErrorKind, KbError};
pub use git::{
    CredentialOutcome, CredentialStatus, GitCli, GitSafety, HttpsCredentials, PullOutcome,
    StashToken, StatusEntry, SwitchOutcome, VersionControlPort,
};
pub use lock::{RepositoryLock, RepositoryLockGuard};
pub use reference::{
    CandidateIndex, FixOutcome, FixedDocument, Fixer, Reference, ReferenceKind, ReferenceParser,
    ReferenceStatus, Resolver,
};
pub use report::{CommitResult, FixScope, IntegrityReport, StepOutcome, SyncReport};
pub use repository::{is_valid_branch_name, BranchName, Repository};
pub use sync::SyncEngine;
