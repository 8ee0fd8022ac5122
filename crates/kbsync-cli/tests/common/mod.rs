//! Shared test utilities for kbsync-cli integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::process::Command as StdCommand;

use assert_cmd::Command;

/// Get a Command for the kbsync binary, isolated from the caller's
/// environment and global config.
///
/// # Panics
///
/// Panics if the kbsync binary cannot be found. This should not happen
/// in a properly configured test environment.
#[allow(deprecated)]
pub fn kbsync_cmd(global_config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("kbsync").expect("kbsync binary should exist");
    for var in [
        "KBSYNC_VERBOSE",
        "KBSYNC_QUIET",
        "KBSYNC_REPO",
        "KBSYNC_CONFIG",
        "KBSYNC_COLOR",
        "KBSYNC_GIT_USERNAME",
        "KBSYNC_GIT_TOKEN",
    ] {
        cmd.env_remove(var);
    }
    cmd.env("NO_COLOR", "1").arg("--config").arg(global_config);
    cmd
}

/// Whether a `git` executable is installed.
pub fn git_available() -> bool {
    StdCommand::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Run git in `dir`, panicking on failure.
pub fn git(dir: &Path, args: &[&str]) -> String {
    let out = StdCommand::new("git")
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

/// Initialize a repository on `main` with one commit and no remote.
pub fn init_repo(dir: &Path) {
    git(dir, &["init", "-q"]);
    git(dir, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    git(dir, &["config", "user.name", "kb-bot"]);
    git(dir, &["config", "user.email", "kb-bot@example.com"]);
    git(dir, &["config", "commit.gpgsign", "false"]);
    fs::write(dir.join("README.md"), "# Knowledge base\n").expect("write README");
    git(dir, &["add", "-A"]);
    git(dir, &["commit", "-q", "-m", "initial"]);
}

/// Write a file, creating parent directories.
pub fn write(root: &Path, path: &str, text: &str) {
    let p = root.join(path);
    fs::create_dir_all(p.parent().expect("parent")).expect("create dirs");
    fs::write(p, text).expect("write file");
}
