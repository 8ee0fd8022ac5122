//! Result types returned by the sync engine.
//!
//! All reports serialize to JSON with camelCase keys. Failures are carried
//! as values ([`ErrorKind`] plus a message) so callers never need to handle
//! an `Err` from the orchestrator.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{ErrorKind, KbError};
use crate::git::credentials::CredentialOutcome;
use crate::reference::{FixOutcome, ReferenceStatus};

// ============================================================================
// Step outcomes
// ============================================================================

/// Outcome of one git step (push, stash restoration, …).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    /// Whether the step succeeded.
    pub success: bool,
    /// Human-readable message.
    pub message: String,
    /// Kind of the failure, when `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl StepOutcome {
    /// A successful step.
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            error_kind: None,
        }
    }

    /// A failed step.
    pub fn failed(error: &KbError) -> Self {
        Self {
            success: false,
            message: error.to_string(),
            error_kind: Some(error.kind()),
        }
    }
}

/// Outcome of the commit step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResult {
    /// Whether a commit was created.
    pub success: bool,
    /// Human-readable message.
    pub message: String,
    /// Full id of the new commit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit_id: Option<String>,
    /// Stash created by a branch switch that still has to be restored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stash_token: Option<String>,
    /// Kind of the failure, when `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

// ============================================================================
// Integrity
// ============================================================================

/// Which files an integrity pass covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FixScope {
    /// Markdown files that differ from the last commit.
    #[default]
    Changed,
    /// Every markdown file in the tree.
    All,
}

/// Result of checking or fixing references.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    /// Files covered.
    pub scope: FixScope,
    /// Whether rewritten files were left unwritten.
    pub dry_run: bool,
    /// Markdown files read.
    pub files_scanned: usize,
    /// Files whose text changed (written unless `dry_run`).
    pub files_touched: Vec<String>,
    /// References examined.
    pub references_checked: usize,
    /// References rewritten to an existing file.
    pub references_fixed: usize,
    /// References marked as broken.
    pub references_unfixable: usize,
    /// References still missing (check only).
    pub references_missing: usize,
    /// References pointing outside the root or media directories.
    pub outside_root_warnings: usize,
    /// Every non-external reference, sorted by file, line and column.
    pub findings: Vec<FixOutcome>,
}

impl IntegrityReport {
    /// Record the outcomes of one document.
    pub fn record(&mut self, outcomes: Vec<FixOutcome>) {
        self.files_scanned += 1;
        for outcome in outcomes {
            self.references_checked += 1;
            match outcome.status {
                ReferenceStatus::External => continue,
                ReferenceStatus::Ok => {}
                ReferenceStatus::Fixed => self.references_fixed += 1,
                ReferenceStatus::Unfixable => self.references_unfixable += 1,
                ReferenceStatus::Missing => self.references_missing += 1,
                ReferenceStatus::OutsideRoot => self.outside_root_warnings += 1,
            }
            self.findings.push(outcome);
        }
    }

    /// Sort findings by (file, line, column).
    pub fn finish(&mut self) {
        self.findings.sort_by(|a, b| {
            (&a.reference.file, a.reference.line, a.reference.column).cmp(&(
                &b.reference.file,
                b.reference.line,
                b.reference.column,
            ))
        });
        self.files_touched.sort();
        self.files_touched.dedup();
    }

    /// Findings that need attention (anything but `ok`).
    pub fn problems(&self) -> impl Iterator<Item = &FixOutcome> {
        self.findings
            .iter()
            .filter(|f| f.status != ReferenceStatus::Ok)
    }
}

// ============================================================================
// SyncReport
// ============================================================================

/// Everything that happened during one `auto_commit_and_push` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Unique id of this sync attempt.
    pub sync_id: Uuid,
    /// When the attempt started.
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration.
    pub duration_ms: u64,
    /// Repository root.
    pub root: PathBuf,
    /// Remote pushed to.
    pub remote: String,
    /// Branch committed on, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// Overall result. True when the commit persisted (even if the push
    /// failed) or when there was nothing to do.
    pub success: bool,
    /// Whether the working tree was clean, so nothing was committed.
    pub no_op: bool,
    /// Human-readable summary.
    pub message: String,
    /// Kind of the fatal failure, when `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,

    /// Reference integrity summary.
    pub integrity: IntegrityReport,

    /// Commit step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<CommitResult>,
    /// Credential injection, one entry per remote.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub credentials: Vec<CredentialOutcome>,
    /// Push step.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push: Option<StepOutcome>,
    /// Restoration of the stash created by a branch switch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stash: Option<StepOutcome>,
}

impl SyncReport {
    /// Empty report for an attempt starting now.
    pub fn start(root: PathBuf, remote: &str, branch: Option<String>) -> Self {
        Self {
            sync_id: Uuid::new_v4(),
            started_at: Utc::now(),
            duration_ms: 0,
            root,
            remote: remote.to_string(),
            branch,
            success: false,
            no_op: false,
            message: String::new(),
            error_kind: None,
            integrity: IntegrityReport::default(),
            commit: None,
            credentials: Vec::new(),
            push: None,
            stash: None,
        }
    }

    /// Number of files rewritten by the fixer.
    pub fn files_touched(&self) -> usize {
        self.integrity.files_touched.len()
    }

    /// Number of references rewritten.
    pub fn references_fixed(&self) -> usize {
        self.integrity.references_fixed
    }

    /// Number of references marked as broken.
    pub fn references_unfixable(&self) -> usize {
        self.integrity.references_unfixable
    }

    /// Whether the commit persisted but the remote was not updated.
    pub fn is_partial(&self) -> bool {
        self.success && self.push.as_ref().map_or(false, |p| !p.success)
    }

    pub(crate) fn fail(&mut self, error: &KbError) {
        self.success = false;
        self.error_kind = Some(error.kind());
        self.message = error.to_string();
    }

    pub(crate) fn finish(&mut self) {
        self.integrity.finish();
        let elapsed = Utc::now().signed_duration_since(self.started_at);
        self.duration_ms = u64::try_from(elapsed.num_milliseconds()).unwrap_or(0);
    }
}
