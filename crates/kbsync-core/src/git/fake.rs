//! In-memory [`VersionControlPort`] for unit tests.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::port::{StatusEntry, VersionControlPort};
use crate::errors::{ErrorKind, KbError};

#[derive(Debug, Default)]
pub(crate) struct FakeState {
    pub is_repository: bool,
    pub branch: Option<String>,
    pub branches: BTreeSet<String>,
    pub entries: Vec<StatusEntry>,
    pub staged: bool,
    pub commits: Vec<String>,
    pub remotes: BTreeMap<String, String>,
    pub remote_branches: BTreeSet<(String, String)>,
    pub stashes: Vec<(String, Vec<StatusEntry>)>,
    pub next_id: u64,
    pub calls: Vec<String>,
    pub fail: BTreeMap<&'static str, ErrorKind>,
    pub checkout_lands_on: Option<String>,
    pub head: String,
    pub branch_lookups_left: Option<usize>,
}

/// Scriptable fake git.
#[derive(Debug)]
pub(crate) struct FakeVcs {
    state: Mutex<FakeState>,
}

fn error_for(kind: ErrorKind, op: &str) -> KbError {
    match kind {
        ErrorKind::Authentication => KbError::Authentication {
            remote: "origin".into(),
            reason: "fatal: Authentication failed".into(),
        },
        ErrorKind::Network => KbError::Network {
            operation: op.into(),
            reason: "timed out after 1s".into(),
        },
        ErrorKind::DivergedBranch => KbError::DivergedBranch {
            remote: "origin".into(),
            branch: "main".into(),
            reason: "! [rejected] (fetch first)".into(),
        },
        ErrorKind::StashFailure => KbError::StashFailure {
            reason: "conflict".into(),
            token: None,
        },
        _ => KbError::Git {
            command: op.into(),
            stderr: format!("{op} failed"),
        },
    }
}

impl FakeVcs {
    /// A repository on `main` with one commit and an `origin` remote.
    pub fn new() -> Self {
        let mut state = FakeState {
            is_repository: true,
            branch: Some("main".into()),
            head: "d3ad0001".into(),
            ..FakeState::default()
        };
        state.branches.insert("main".into());
        state
            .remotes
            .insert("origin".into(), "https://github.com/acme/kb.git".into());
        state
            .remote_branches
            .insert(("origin".into(), "main".into()));
        Self {
            state: Mutex::new(state),
        }
    }

    pub fn not_a_repository(self) -> Self {
        self.state().is_repository = false;
        self
    }

    pub fn detached(self) -> Self {
        self.state().branch = None;
        self
    }

    pub fn with_change(self, code: &str, path: &str) -> Self {
        self.state().entries.push(StatusEntry::new(code, path));
        self
    }

    pub fn with_branch(self, branch: &str) -> Self {
        self.state().branches.insert(branch.into());
        self
    }

    pub fn with_remote(self, name: &str, url: &str) -> Self {
        self.state().remotes.insert(name.into(), url.into());
        self
    }

    pub fn without_remotes(self) -> Self {
        self.state().remotes.clear();
        self
    }

    pub fn without_remote_branch(self, remote: &str, branch: &str) -> Self {
        self.state()
            .remote_branches
            .remove(&(remote.to_string(), branch.to_string()));
        self
    }

    /// Make `op` fail with an error of `kind`.
    pub fn failing(self, op: &'static str, kind: ErrorKind) -> Self {
        self.state().fail.insert(op, kind);
        self
    }

    pub fn checkout_lands_on(self, branch: &str) -> Self {
        self.state().checkout_lands_on = Some(branch.into());
        self
    }

    /// Let `current_branch` answer `n` times, then fail.
    pub fn branch_lookup_fails_after(self, n: usize) -> Self {
        self.state().branch_lookups_left = Some(n);
        self
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    fn enter(&self, call: String, op: &'static str) -> Result<MutexGuard<'_, FakeState>, KbError> {
        let mut state = self.state();
        state.calls.push(call);
        match state.fail.get(op) {
            Some(kind) => Err(error_for(*kind, op)),
            None => Ok(state),
        }
    }
}

fn next_id(state: &mut FakeState, prefix: &str) -> String {
    state.next_id += 1;
    format!("{prefix}{:04}", state.next_id)
}

impl VersionControlPort for FakeVcs {
    fn verify_repository(&self, root: &Path) -> Result<(), KbError> {
        if self.state().is_repository {
            Ok(())
        } else {
            Err(KbError::RepositoryState {
                path: root.to_path_buf(),
                reason: "not a git repository".into(),
            })
        }
    }

    fn status(&self) -> Result<Vec<StatusEntry>, KbError> {
        let state = self.enter("status".into(), "status")?;
        Ok(state.entries.clone())
    }

    fn current_branch(&self) -> Result<Option<String>, KbError> {
        let mut state = self.state();
        match state.branch_lookups_left {
            Some(0) => return Err(error_for(ErrorKind::Git, "symbolic-ref")),
            Some(ref mut left) => *left -= 1,
            None => {}
        }
        Ok(state.branch.clone())
    }

    fn head_commit(&self) -> Result<String, KbError> {
        Ok(self.enter("rev-parse HEAD".into(), "rev-parse")?.head.clone())
    }

    fn stage(&self, paths: &[&Path]) -> Result<(), KbError> {
        let mut state = self.enter(format!("add {}", paths.len()), "add")?;
        let any = paths.iter().any(|p| {
            let p = p.to_string_lossy();
            state.entries.iter().any(|e| e.path == p)
        });
        state.staged |= any;
        Ok(())
    }

    fn stage_all(&self) -> Result<(), KbError> {
        let mut state = self.enter("add -A".into(), "add")?;
        state.staged = !state.entries.is_empty();
        Ok(())
    }

    fn has_staged_changes(&self) -> Result<bool, KbError> {
        Ok(self.state().staged)
    }

    fn commit(&self, message: &str) -> Result<String, KbError> {
        let mut state = self.enter(format!("commit {message}"), "commit")?;
        if !state.staged {
            return Err(KbError::NothingToCommit);
        }
        let id = next_id(&mut state, "c0ffee");
        state.commits.push(message.to_string());
        state.entries.clear();
        state.staged = false;
        Ok(id)
    }

    fn remotes(&self) -> Result<Vec<String>, KbError> {
        Ok(self.state().remotes.keys().cloned().collect())
    }

    fn remote_url(&self, remote: &str) -> Result<String, KbError> {
        self.state()
            .remotes
            .get(remote)
            .cloned()
            .ok_or_else(|| KbError::RemoteNotFound(remote.to_string()))
    }

    fn set_remote_url(&self, remote: &str, url: &str) -> Result<(), KbError> {
        let mut state = self.enter(format!("set-url {remote}"), "set-url")?;
        if url.contains("fail-set-url") {
            return Err(error_for(ErrorKind::Git, "remote"));
        }
        state.remotes.insert(remote.to_string(), url.to_string());
        Ok(())
    }

    fn fetch(&self, remote: &str) -> Result<(), KbError> {
        self.enter(format!("fetch {remote}"), "fetch").map(|_| ())
    }

    fn remote_branch_exists(&self, remote: &str, branch: &str) -> Result<bool, KbError> {
        Ok(self
            .state()
            .remote_branches
            .contains(&(remote.to_string(), branch.to_string())))
    }

    fn merge_ff_only(&self, remote: &str, branch: &str) -> Result<(), KbError> {
        self.enter(format!("merge {remote}/{branch}"), "merge")
            .map(|_| ())
    }

    fn push(&self, remote: &str, branch: &str, set_upstream: bool) -> Result<(), KbError> {
        let mut state = self.enter(
            format!("push {remote} {branch} upstream={set_upstream}"),
            "push",
        )?;
        state
            .remote_branches
            .insert((remote.to_string(), branch.to_string()));
        Ok(())
    }

    fn stash_push(&self, message: &str) -> Result<Option<String>, KbError> {
        let mut state = self.enter(format!("stash push {message}"), "stash push")?;
        if state.entries.is_empty() {
            return Ok(None);
        }
        let token = next_id(&mut state, "5ta5h");
        let entries = std::mem::take(&mut state.entries);
        state.stashes.push((token.clone(), entries));
        Ok(Some(token))
    }

    fn stash_pop(&self, token: &str) -> Result<(), KbError> {
        let mut state = self.enter(format!("stash pop {token}"), "stash pop")?;
        let index = state
            .stashes
            .iter()
            .position(|(t, _)| t == token)
            .ok_or_else(|| KbError::StashFailure {
                reason: format!("stash {token} no longer exists"),
                token: None,
            })?;
        let (_, entries) = state.stashes.remove(index);
        state.entries.extend(entries);
        Ok(())
    }

    fn branch_exists(&self, branch: &str) -> Result<bool, KbError> {
        Ok(self.state().branches.contains(branch))
    }

    fn create_branch(&self, branch: &str) -> Result<(), KbError> {
        let mut state = self.enter(format!("branch {branch}"), "branch")?;
        state.branches.insert(branch.to_string());
        Ok(())
    }

    fn checkout(&self, branch: &str, create: bool) -> Result<(), KbError> {
        let mut state = self.enter(format!("checkout {branch} create={create}"), "checkout")?;
        if !create && branch == state.head {
            state.branch = None;
            return Ok(());
        }
        if create {
            state.branches.insert(branch.to_string());
        } else if !state.branches.contains(branch) {
            return Err(error_for(ErrorKind::Git, "checkout"));
        }
        let landed = state
            .checkout_lands_on
            .take()
            .unwrap_or_else(|| branch.to_string());
        state.branch = Some(landed);
        Ok(())
    }
}

/// Lets a test keep a handle on the fake after handing it to a repository.
impl VersionControlPort for std::sync::Arc<FakeVcs> {
    fn verify_repository(&self, root: &Path) -> Result<(), KbError> {
        self.as_ref().verify_repository(root)
    }
    fn status(&self) -> Result<Vec<StatusEntry>, KbError> {
        self.as_ref().status()
    }
    fn current_branch(&self) -> Result<Option<String>, KbError> {
        self.as_ref().current_branch()
    }
    fn head_commit(&self) -> Result<String, KbError> {
        self.as_ref().head_commit()
    }
    fn stage(&self, paths: &[&Path]) -> Result<(), KbError> {
        self.as_ref().stage(paths)
    }
    fn stage_all(&self) -> Result<(), KbError> {
        self.as_ref().stage_all()
    }
    fn has_staged_changes(&self) -> Result<bool, KbError> {
        self.as_ref().has_staged_changes()
    }
    fn commit(&self, message: &str) -> Result<String, KbError> {
        self.as_ref().commit(message)
    }
    fn remotes(&self) -> Result<Vec<String>, KbError> {
        self.as_ref().remotes()
    }
    fn remote_url(&self, remote: &str) -> Result<String, KbError> {
        self.as_ref().remote_url(remote)
    }
    fn set_remote_url(&self, remote: &str, url: &str) -> Result<(), KbError> {
        self.as_ref().set_remote_url(remote, url)
    }
    fn fetch(&self, remote: &str) -> Result<(), KbError> {
        self.as_ref().fetch(remote)
    }
    fn remote_branch_exists(&self, remote: &str, branch: &str) -> Result<bool, KbError> {
        self.as_ref().remote_branch_exists(remote, branch)
    }
    fn merge_ff_only(&self, remote: &str, branch: &str) -> Result<(), KbError> {
        self.as_ref().merge_ff_only(remote, branch)
    }
    fn push(&self, remote: &str, branch: &str, set_upstream: bool) -> Result<(), KbError> {
        self.as_ref().push(remote, branch, set_upstream)
    }
    fn stash_push(&self, message: &str) -> Result<Option<String>, KbError> {
        self.as_ref().stash_push(message)
    }
    fn stash_pop(&self, token: &str) -> Result<(), KbError> {
        self.as_ref().stash_pop(token)
    }
    fn branch_exists(&self, branch: &str) -> Result<bool, KbError> {
        self.as_ref().branch_exists(branch)
    }
    fn create_branch(&self, branch: &str) -> Result<(), KbError> {
        self.as_ref().create_branch(branch)
    }
    fn checkout(&self, branch: &str, create: bool) -> Result<(), KbError> {
        self.as_ref().checkout(branch, create)
    }
}
