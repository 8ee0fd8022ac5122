//! The sync orchestrator.
//!
//! [`SyncEngine`] composes change collection, reference repair and the git
//! safety layer into one validate-then-commit-then-push protocol:
//!
//! ```text
//! START
//!  -> branch given?   SWITCH_BRANCH (stash-protected)   failure: abort, nothing changed
//!     no branch?      HEAD must be attached             failure: DetachedHead
//!  -> CHECK_DIRTY     clean: done (no-op)
//!  -> VALIDATE_AND_FIX -> STAGE_ALL
//!  -> COMMIT          failure: report, staged changes remain
//!  -> remote configured? [credentials] PUSH   failure: still a success, push reported
//!  -> stash created?  RESTORE_STASH                     failure: report fails
//! ```
//!
//! The orchestrator never returns `Err`; every expected failure is a value
//! inside the [`SyncReport`].

use std::path::Path;

use crate::changeset::{collect_all_markdown, collect_changes, ChangeRecord};
use crate::errors::KbError;
use crate::git::safety::{short_id, GitSafety, StashToken};
use crate::reference::{CandidateIndex, FixOutcome, Fixer, ReferenceParser, Resolver};
use crate::report::{CommitResult, FixScope, IntegrityReport, StepOutcome, SyncReport};
use crate::repository::{BranchName, Repository};

/// Runs integrity passes and the sync protocol over a [`Repository`].
///
/// # Example
///
/// ```ignore
/// use kbsync_core::{Repository, SyncConfig, SyncEngine};
///
/// let repo = Repository::open(Path::new("/srv/kb"), SyncConfig::default())?;
/// let report = SyncEngine::new().auto_commit_and_push(&repo, "agent notes", None, None);
/// if !report.success {
///     eprintln!("{}", report.message);
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct SyncEngine {
    _private: (),
}

impl SyncEngine {
    /// Create a new engine.
    pub fn new() -> Self {
        Self::default()
    }

    // -------------------------------------------------------------------------
    // Integrity
    // -------------------------------------------------------------------------

    /// Classify the references of changed (or all) markdown files without
    /// writing anything. Missing references are reported as `missing`.
    pub fn check(&self, repo: &Repository, scope: FixScope) -> Result<IntegrityReport, KbError> {
        let files = files_in_scope(repo, scope)?;
        let settings = repo.settings();
        let resolver = Resolver::new(repo.root()).with_media_dirs(&settings.media_dirs);

        let mut report = IntegrityReport {
            scope,
            dry_run: true,
            ..IntegrityReport::default()
        };

        for change in files.iter().filter(|c| c.kind.is_present()) {
            let Some(text) = read_markdown(repo, &change.path) else {
                continue;
            };
            let outcomes = ReferenceParser::new(&change.path)
                .skip_code_blocks(settings.skip_code_blocks)
                .references(&text)
                .map(|reference| {
                    let status = resolver.classify(&reference).status;
                    let original = reference.path.clone();
                    FixOutcome {
                        reference,
                        status,
                        original,
                        replacement: None,
                        marker: None,
                        changed: false,
                    }
                })
                .collect();
            report.record(outcomes);
        }

        report.finish();
        Ok(report)
    }

    /// Repair references in changed (or all) markdown files without
    /// committing. With `dry_run`, nothing is written.
    ///
    /// # Errors
    ///
    /// Returns [`KbError::LockUnavailable`] when another operation holds the
    /// repository, or any I/O error raised while writing a file.
    pub fn fix(
        &self,
        repo: &Repository,
        scope: FixScope,
        dry_run: bool,
    ) -> Result<IntegrityReport, KbError> {
        let _session = repo.session()?;
        let files = files_in_scope(repo, scope)?;
        let mut report = self.fix_files(repo, &files, dry_run)?;
        report.scope = scope;
        Ok(report)
    }

    fn fix_files(
        &self,
        repo: &Repository,
        files: &[ChangeRecord],
        dry_run: bool,
    ) -> Result<IntegrityReport, KbError> {
        let settings = repo.settings();
        let index = CandidateIndex::build(repo.root())?;
        let fixer = Fixer::new(repo.root(), &index)
            .with_media_dirs(&settings.media_dirs)
            .skip_code_blocks(settings.skip_code_blocks);

        let mut report = IntegrityReport {
            dry_run,
            ..IntegrityReport::default()
        };

        for change in files.iter().filter(|c| c.kind.is_present()) {
            let Some(text) = read_markdown(repo, &change.path) else {
                continue;
            };
            let document = fixer.fix_document(&change.path, &text);
            if document.changed() {
                if !dry_run {
                    repo.write_file(Path::new(&change.path), &document.text)?;
                    tracing::info!("Rewrote references in {}", change.path);
                }
                report.files_touched.push(change.path.clone());
            }
            report.record(document.outcomes);
        }

        report.finish();
        Ok(report)
    }

    // -------------------------------------------------------------------------
    // Sync
    // -------------------------------------------------------------------------

    /// Validate, repair, commit and push the pending changes.
    ///
    /// `remote` defaults to the configured remote, `branch` to the configured
    /// branch; with no branch at all the checked-out branch is used.
    pub fn auto_commit_and_push(
        &self,
        repo: &Repository,
        message: &str,
        remote: Option<&str>,
        branch: Option<&BranchName>,
    ) -> SyncReport {
        let remote = remote.unwrap_or_else(|| repo.default_remote()).to_string();
        let branch = branch.or_else(|| repo.default_branch()).cloned();
        let mut report = SyncReport::start(
            repo.root().to_path_buf(),
            &remote,
            branch.as_ref().map(|b| b.to_string()),
        );

        tracing::debug!("Sync {} started (remote {})", report.sync_id, remote);

        match repo.session() {
            Ok(session) => self.run(&session, message, &remote, branch.as_ref(), &mut report),
            Err(e) => report.fail(&e),
        }

        report.finish();
        if report.success {
            tracing::info!("Sync {}: {}", report.sync_id, report.message);
        } else {
            tracing::warn!("Sync {} failed: {}", report.sync_id, report.message);
        }
        report
    }

    fn run(
        &self,
        session: &GitSafety<'_>,
        message: &str,
        remote: &str,
        branch: Option<&BranchName>,
        report: &mut SyncReport,
    ) {
        // SWITCH_BRANCH or require an attached HEAD
        let (branch, stash) = match branch {
            Some(target) => match session.switch_branch(target) {
                Ok(outcome) => (target.clone(), outcome.stash),
                Err(e) => {
                    report.fail(&e);
                    return;
                }
            },
            None => match session.current_branch() {
                Ok(Some(current)) => match BranchName::try_new(current) {
                    Ok(b) => (b, None),
                    Err(e) => {
                        report.fail(&e);
                        return;
                    }
                },
                Ok(None) => {
                    report.fail(&KbError::DetachedHead {
                        operation: "sync".to_string(),
                    });
                    return;
                }
                Err(e) => {
                    report.fail(&e);
                    return;
                }
            },
        };
        report.branch = Some(branch.to_string());

        self.commit_and_push(session, message, remote, &branch, stash.as_ref(), report);

        // RESTORE_STASH runs on every path after a successful switch
        if let Some(token) = stash {
            match session.restore_stash(&token) {
                Ok(()) => {
                    report.stash = Some(StepOutcome::ok(format!(
                        "Restored stash {}",
                        short_id(token.as_str())
                    )));
                }
                Err(e) => {
                    report.stash = Some(StepOutcome::failed(&e));
                    report.fail(&e);
                }
            }
        }
    }

    fn commit_and_push(
        &self,
        session: &GitSafety<'_>,
        message: &str,
        remote: &str,
        branch: &BranchName,
        stash: Option<&StashToken>,
        report: &mut SyncReport,
    ) {
        let repo = session.repository();

        // CHECK_DIRTY
        match session.is_dirty() {
            Ok(false) => {
                report.success = true;
                report.no_op = true;
                report.message = format!("Nothing to commit on {}", branch);
                return;
            }
            Ok(true) => {}
            Err(e) => {
                report.fail(&e);
                return;
            }
        }

        // VALIDATE_AND_FIX
        let integrity = collect_changes(repo).and_then(|changes| self.fix_files(repo, &changes, false));
        match integrity {
            Ok(integrity) => report.integrity = integrity,
            Err(e) => {
                report.fail(&e);
                return;
            }
        }

        // STAGE_ALL + COMMIT
        let committed = session.stage_all().and_then(|()| session.commit(message));
        let commit_id = match committed {
            Ok(id) => id,
            Err(e) => {
                report.commit = Some(CommitResult {
                    success: false,
                    message: e.to_string(),
                    commit_id: None,
                    stash_token: stash.map(ToString::to_string),
                    error_kind: Some(e.kind()),
                });
                report.fail(&e);
                report.message = format!("Commit failed; staged changes remain: {}", e);
                return;
            }
        };

        report.success = true;
        report.commit = Some(CommitResult {
            success: true,
            message: format!("Committed {} on {}", short_id(&commit_id), branch),
            commit_id: Some(commit_id.clone()),
            stash_token: stash.map(ToString::to_string),
            error_kind: None,
        });
        report.message = format!(
            "Committed {} ({} fixed, {} unfixable)",
            short_id(&commit_id),
            report.integrity.references_fixed,
            report.integrity.references_unfixable
        );

        // PUSH, only when the remote exists
        let configured = match repo.vcs().remotes() {
            Ok(remotes) => remotes.iter().any(|r| r == remote),
            Err(e) => {
                report.push = Some(StepOutcome::failed(&e));
                return;
            }
        };
        if !configured {
            report.message.push_str(&format!("; remote `{}` not configured, push skipped", remote));
            return;
        }

        if let Some(credentials) = repo.credentials() {
            match session.ensure_https_credentials(&credentials) {
                Ok(outcomes) => report.credentials = outcomes,
                Err(e) => tracing::warn!("Could not update remote credentials: {}", e),
            }
        }

        match session.push(remote, branch) {
            Ok(()) => {
                report.push = Some(StepOutcome::ok(format!("Pushed {} to {}", branch, remote)));
                report.message.push_str(&format!("; pushed to {}/{}", remote, branch));
            }
            Err(e) => {
                tracing::warn!("Push to {} failed after commit: {}", remote, e);
                report.message.push_str(&format!("; push failed ({})", e.kind()));
                report.push = Some(StepOutcome::failed(&e));
            }
        }
    }
}

fn files_in_scope(repo: &Repository, scope: FixScope) -> Result<Vec<ChangeRecord>, KbError> {
    match scope {
        FixScope::Changed => collect_changes(repo),
        FixScope::All => collect_all_markdown(repo),
    }
}

/// Read a markdown file, skipping (with a warning) files that are not text.
fn read_markdown(repo: &Repository, path: &str) -> Option<String> {
    match repo.read_file(Path::new(path)) {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::warn!("Skipping {}: {}", path, e);
            None
        }
    }
}
