//! End-to-end tests against a real `git` executable.
//!
//! Each test builds a fresh working clone plus a bare "remote" inside a
//! temporary directory. Tests return early when git is not installed.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use kbsync_core::{
    BranchName, ErrorKind, FixScope, GitCli, PullOutcome, Repository, SyncConfig, SyncEngine,
};
use tempfile::TempDir;

struct Sandbox {
    _temp: TempDir,
    work: PathBuf,
    remote: PathBuf,
}

fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("LC_ALL", "C")
        .output()
        .expect("run git");
    assert!(
        out.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

fn configure_identity(dir: &Path) {
    git(dir, &["config", "user.name", "kb-bot"]);
    git(dir, &["config", "user.email", "kb-bot@example.com"]);
    git(dir, &["config", "commit.gpgsign", "false"]);
}

/// Working clone on `main` with one pushed commit, or `None` without git.
fn sandbox() -> Option<Sandbox> {
    if !GitCli::is_available() {
        eprintln!("git not available; skipping");
        return None;
    }
    let temp = TempDir::new().expect("create temp dir");
    let remote = temp.path().join("remote.git");
    let work = temp.path().join("work");
    fs::create_dir_all(&remote).expect("create remote dir");
    fs::create_dir_all(&work).expect("create work dir");

    git(&remote, &["init", "-q", "--bare"]);
    git(&remote, &["symbolic-ref", "HEAD", "refs/heads/main"]);

    git(&work, &["init", "-q"]);
    git(&work, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    configure_identity(&work);
    fs::write(work.join("README.md"), "# Knowledge base\n").expect("write README");
    git(&work, &["add", "-A"]);
    git(&work, &["commit", "-q", "-m", "initial"]);
    git(&work, &["remote", "add", "origin", remote.to_str().expect("utf-8 path")]);
    git(&work, &["push", "-q", "-u", "origin", "main"]);

    Some(Sandbox {
        _temp: temp,
        work,
        remote,
    })
}

fn write(root: &Path, path: &str, text: &str) {
    let p = root.join(path);
    fs::create_dir_all(p.parent().expect("parent")).expect("create dirs");
    fs::write(p, text).expect("write file");
}

fn open(work: &Path) -> Repository {
    Repository::open(work, SyncConfig::default()).expect("open repository")
}

/// Commit a change to `main` from a second clone, as another agent would.
fn push_from_other_clone(sandbox: &Sandbox, path: &str, text: &str) {
    let other = sandbox.work.with_file_name("other");
    git(
        sandbox.work.parent().expect("parent"),
        &[
            "clone",
            "-q",
            sandbox.remote.to_str().expect("utf-8 path"),
            "other",
        ],
    );
    configure_identity(&other);
    write(&other, path, text);
    git(&other, &["add", "-A"]);
    git(&other, &["commit", "-q", "-m", "from elsewhere"]);
    git(&other, &["push", "-q", "origin", "main"]);
}

// ============================================================================
// Sync
// ============================================================================

#[test]
fn test_sync_fixes_commits_and_pushes() {
    let Some(sb) = sandbox() else { return };
    write(&sb.work, "media/diagram.png", "png");
    write(&sb.work, "topics/design.md", "![d](media/diagram.png)\n");

    let repo = open(&sb.work);
    let report = SyncEngine::new().auto_commit_and_push(&repo, "agent notes", None, None);

    assert!(report.success, "{}", report.message);
    assert_eq!(report.references_fixed(), 1);
    assert!(report.push.as_ref().expect("push step").success);
    assert_eq!(
        fs::read_to_string(sb.work.join("topics/design.md")).expect("read"),
        "![d](../media/diagram.png)\n"
    );
    assert_eq!(
        git(&sb.remote, &["log", "-1", "--format=%s", "main"]),
        "agent notes"
    );
    assert_eq!(git(&sb.work, &["status", "--porcelain"]), "");
}

#[test]
fn test_sync_clean_tree_is_noop() {
    let Some(sb) = sandbox() else { return };
    let head = git(&sb.work, &["rev-parse", "HEAD"]);

    let repo = open(&sb.work);
    let report = SyncEngine::new().auto_commit_and_push(&repo, "nothing", None, None);

    assert!(report.success);
    assert!(report.no_op);
    assert_eq!(git(&sb.work, &["rev-parse", "HEAD"]), head);
}

#[test]
fn test_sync_detached_head_refuses() {
    let Some(sb) = sandbox() else { return };
    git(&sb.work, &["checkout", "-q", "--detach"]);
    write(&sb.work, "notes.md", "# notes\n");

    let repo = open(&sb.work);
    let report = SyncEngine::new().auto_commit_and_push(&repo, "notes", None, None);

    assert!(!report.success);
    assert_eq!(report.error_kind, Some(ErrorKind::DetachedHead));
    assert!(report.commit.is_none());
}

#[test]
fn test_sync_push_rejected_keeps_commit() {
    let Some(sb) = sandbox() else { return };
    push_from_other_clone(&sb, "elsewhere.md", "x\n");
    write(&sb.work, "local.md", "# local\n");

    let repo = open(&sb.work);
    let report = SyncEngine::new().auto_commit_and_push(&repo, "local work", None, None);

    assert!(report.success, "{}", report.message);
    assert!(report.is_partial());
    let push = report.push.as_ref().expect("push step");
    assert_eq!(push.error_kind, Some(ErrorKind::DivergedBranch));
    assert_eq!(git(&sb.work, &["log", "-1", "--format=%s"]), "local work");
}

#[test]
fn test_sync_to_new_branch_restores_stash() {
    let Some(sb) = sandbox() else { return };
    write(&sb.work, "draft.md", "# draft\n");

    let repo = open(&sb.work);
    let branch = BranchName::try_new("notes").expect("valid branch");
    let report = SyncEngine::new().auto_commit_and_push(&repo, "draft", None, Some(&branch));

    assert!(report.success, "{}", report.message);
    assert!(report.stash.as_ref().expect("stash step").success);
    assert_eq!(git(&sb.work, &["symbolic-ref", "--short", "HEAD"]), "notes");
    assert!(sb.work.join("draft.md").exists());
    assert_eq!(git(&sb.work, &["stash", "list"]), "");
}

// ============================================================================
// Safety layer
// ============================================================================

#[test]
fn test_add_rejects_traversal() {
    let Some(sb) = sandbox() else { return };
    let repo = open(&sb.work);
    let session = repo.session().expect("lock");

    let err = session.add(Path::new("../remote.git/HEAD")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PathTraversal);
    assert_eq!(git(&sb.work, &["diff", "--cached", "--name-only"]), "");
}

#[test]
fn test_pull_fast_forwards() {
    let Some(sb) = sandbox() else { return };
    push_from_other_clone(&sb, "elsewhere.md", "x\n");

    let repo = open(&sb.work);
    let session = repo.session().expect("lock");
    let outcome = session
        .pull("origin", &BranchName::default_branch())
        .expect("pull");

    assert_eq!(outcome, PullOutcome::FastForwarded);
    assert!(sb.work.join("elsewhere.md").exists());
}

#[test]
fn test_pull_refuses_dirty_tree() {
    let Some(sb) = sandbox() else { return };
    write(&sb.work, "README.md", "# changed\n");

    let repo = open(&sb.work);
    let session = repo.session().expect("lock");
    let err = session
        .pull("origin", &BranchName::default_branch())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DirtyWorkingTree);
}

#[test]
fn test_push_unknown_remote() {
    let Some(sb) = sandbox() else { return };
    let repo = open(&sb.work);
    let session = repo.session().expect("lock");
    let err = session
        .push("upstream", &BranchName::default_branch())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RemoteNotFound);
}

// ============================================================================
// Integrity passes
// ============================================================================

#[test]
fn test_check_all_reports_missing_in_committed_files() {
    let Some(sb) = sandbox() else { return };
    write(&sb.work, "guide.md", "[gone](gone.md)\n");
    git(&sb.work, &["add", "-A"]);
    git(&sb.work, &["commit", "-q", "-m", "guide"]);

    let repo = open(&sb.work);
    let engine = SyncEngine::new();
    let changed = engine.check(&repo, FixScope::Changed).expect("check");
    assert_eq!(changed.files_scanned, 0);

    let all = engine.check(&repo, FixScope::All).expect("check");
    assert_eq!(all.references_missing, 1);
    assert_eq!(all.findings[0].reference.file, "guide.md");
}
