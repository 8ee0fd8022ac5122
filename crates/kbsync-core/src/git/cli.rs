//! [`VersionControlPort`] backed by the `git` executable.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use super::classify::{classify_failure, FailureContext};
use super::credentials::redact_url;
use super::port::{StatusEntry, VersionControlPort};
use crate::errors::KbError;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Which timeout applies to an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Budget {
    /// Touches only the local repository.
    Local,
    /// Talks to a remote.
    Network,
}

/// Error for an invocation killed after `timeout`.
///
/// Only network commands report [`KbError::Network`]; a hung local command
/// points at the repository itself (a stale `index.lock`, a hook, a slow disk).
fn timeout_error(budget: Budget, root: &Path, operation: &str, timeout: Duration) -> KbError {
    let reason = format!("git {} timed out after {}s", operation, timeout.as_secs());
    match budget {
        Budget::Network => KbError::Network {
            operation: operation.to_string(),
            reason,
        },
        Budget::Local => KbError::RepositoryState {
            path: root.to_path_buf(),
            reason,
        },
    }
}

/// Captured result of one git invocation.
#[derive(Debug)]
struct GitOutput {
    status: ExitStatus,
    stdout: String,
    stderr: String,
}

/// Drives `git` in a fixed working tree.
///
/// Every call runs with `GIT_TERMINAL_PROMPT=0` and `LC_ALL=C` so that a
/// missing credential fails fast and error text is stable.
#[derive(Debug, Clone)]
pub struct GitCli {
    root: PathBuf,
    program: PathBuf,
    network_timeout: Duration,
    local_timeout: Duration,
}

impl GitCli {
    /// Create a client for the working tree at `root`.
    pub fn new(root: impl Into<PathBuf>, network_timeout: Duration, local_timeout: Duration) -> Self {
        Self {
            root: root.into(),
            program: PathBuf::from("git"),
            network_timeout,
            local_timeout,
        }
    }

    /// Use a specific git executable.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Whether a `git` executable can be started.
    pub fn is_available() -> bool {
        Command::new("git")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .current_dir(&self.root)
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("LC_ALL", "C")
            .env("GIT_ASKPASS", "")
            .env("SSH_ASKPASS", "")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }
    /// Run git, killing it when the timeout for `budget` elapses.
    /// Run git, killing it when `timeout` elapses.
    fn run(&self, args: &[&str], budget: Budget, operation: &str) -> Result<GitOutput, KbError> {
        let timeout = match budget {
            Budget::Local => self.local_timeout,
            Budget::Network => self.network_timeout,
        };
        let shown = redact_url(&args.join(" "));
        tracing::debug!("git {} (timeout {:?})", shown, timeout);

        let mut child = self.command(args).spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                KbError::RepositoryState {
                    path: self.root.clone(),
                    reason: format!("git executable `{}` not found", self.program.display()),
                }
            } else {
                KbError::Io(e)
            }
        })?;

        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);

        let start = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if start.elapsed() >= timeout {
                let _ = child.kill();
                let _ = child.wait();
                tracing::warn!("git {} killed after {:?}", shown, timeout);
                return Err(timeout_error(budget, &self.root, operation, timeout));
            }
            thread::sleep(POLL_INTERVAL);
        };

        let output = GitOutput {
            status,
            stdout: stdout.map(join_reader).unwrap_or_default(),
            stderr: redact_url(&stderr.map(join_reader).unwrap_or_default()),
        };
        tracing::debug!(
            "git {} exited with {} after {:?}",
            shown,
            output.status,
            start.elapsed()
        );
        Ok(output)
    }

    /// Run a local command and require success.
    fn local(&self, args: &[&str]) -> Result<String, KbError> {
        let operation = args.first().copied().unwrap_or("git");
        let out = self.run(args, Budget::Local, operation)?;
        if out.status.success() {
            Ok(out.stdout)
        } else {
            Err(classify_failure(FailureContext::local(operation), &out.stderr))
        }
    }

    /// Run a local command whose exit code answers a yes/no question.
    fn probe(&self, args: &[&str]) -> Result<bool, KbError> {
        let operation = args.first().copied().unwrap_or("git");
        let out = self.run(args, Budget::Local, operation)?;
        match out.status.code() {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(classify_failure(FailureContext::local(operation), &out.stderr)),
        }
    }

    fn stash_head(&self) -> Result<Option<String>, KbError> {
        let out = self.run(
            &["rev-parse", "-q", "--verify", "refs/stash"],
            Budget::Local,
            "rev-parse",
        )?;
        if out.status.success() {
            Ok(Some(out.stdout.trim().to_string()))
        } else {
            Ok(None)
        }
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    })
}

fn join_reader(handle: thread::JoinHandle<String>) -> String {
    handle.join().unwrap_or_default()
}

/// Parse `git status --porcelain=v1 -z` output.
pub fn parse_porcelain_z(raw: &str) -> Vec<StatusEntry> {
    let mut entries = Vec::new();
    let mut fields = raw.split('\0').filter(|f| !f.is_empty());

    while let Some(field) = fields.next() {
        if field.len() < 4 {
            continue;
        }
        let (code, path) = field.split_at(2);
        let path = &path[1..];
        let mut entry = StatusEntry::new(code, path);
        if code.starts_with('R') || code.starts_with('C') {
            if let Some(orig) = fields.next() {
                entry = entry.with_orig_path(orig);
            }
        }
        entries.push(entry);
    }

    entries
}

impl VersionControlPort for GitCli {
    fn verify_repository(&self, root: &Path) -> Result<(), KbError> {
        let out = self.run(
            &["rev-parse", "--show-toplevel"],
            Budget::Local,
            "rev-parse",
        )?;
        if !out.status.success() {
            return Err(KbError::RepositoryState {
                path: root.to_path_buf(),
                reason: out.stderr.trim().to_string(),
            });
        }

        let toplevel = PathBuf::from(out.stdout.trim());
        let same = match (toplevel.canonicalize(), root.canonicalize()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        };
        if same {
            Ok(())
        } else {
            Err(KbError::RepositoryState {
                path: root.to_path_buf(),
                reason: format!(
                    "not the top level of a working tree (top level is {})",
                    toplevel.display()
                ),
            })
        }
    }

    fn status(&self) -> Result<Vec<StatusEntry>, KbError> {
        let raw = self.local(&["status", "--porcelain=v1", "-z", "--untracked-files=all"])?;
        Ok(parse_porcelain_z(&raw))
    }

    fn current_branch(&self) -> Result<Option<String>, KbError> {
        let out = self.run(
            &["symbolic-ref", "--quiet", "--short", "HEAD"],
            Budget::Local,
            "symbolic-ref",
        )?;
        match out.status.code() {
            Some(0) => Ok(Some(out.stdout.trim().to_string())),
            Some(1) => Ok(None),
            _ => Err(classify_failure(FailureContext::local("symbolic-ref"), &out.stderr)),
        }
    }

    fn stage(&self, paths: &[&Path]) -> Result<(), KbError> {
        if paths.is_empty() {
            return Ok(());
        }
        let rendered: Vec<String> = paths.iter().map(|p| p.to_string_lossy().into_owned()).collect();
        let mut args = vec!["add", "--"];
        args.extend(rendered.iter().map(String::as_str));
        self.local(&args).map(|_| ())
    }

    fn stage_all(&self) -> Result<(), KbError> {
        self.local(&["add", "-A"]).map(|_| ())
    }

    fn has_staged_changes(&self) -> Result<bool, KbError> {
        // exit 1 means "differences found"
        self.probe(&["diff", "--cached", "--quiet"]).map(|same| !same)
    }

    fn commit(&self, message: &str) -> Result<String, KbError> {
        let out = self.run(&["commit", "-q", "-m", message], Budget::Local, "commit")?;
        if !out.status.success() {
            let text = format!("{}{}", out.stdout, out.stderr);
            if text.contains("nothing to commit") || text.contains("no changes added to commit") {
                return Err(KbError::NothingToCommit);
            }
            return Err(classify_failure(FailureContext::local("commit"), &out.stderr));
        }
        self.head_commit()
    }

    fn head_commit(&self) -> Result<String, KbError> {
        Ok(self.local(&["rev-parse", "HEAD"])?.trim().to_string())
    }

    fn remotes(&self) -> Result<Vec<String>, KbError> {
        Ok(self
            .local(&["remote"])?
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    fn remote_url(&self, remote: &str) -> Result<String, KbError> {
        let out = self.run(&["remote", "get-url", remote], Budget::Local, "remote")?;
        if out.status.success() {
            Ok(out.stdout.trim().to_string())
        } else if out.stderr.contains("No such remote") {
            Err(KbError::RemoteNotFound(remote.to_string()))
        } else {
            Err(classify_failure(FailureContext::local("remote"), &out.stderr))
        }
    }

    fn set_remote_url(&self, remote: &str, url: &str) -> Result<(), KbError> {
        self.local(&["remote", "set-url", remote, url]).map(|_| ())
    }

    fn fetch(&self, remote: &str) -> Result<(), KbError> {
        let out = self.run(
            &["fetch", "--prune", "--quiet", remote],
            Budget::Network,
            "fetch",
        )?;
        if out.status.success() {
            Ok(())
        } else {
            Err(classify_failure(
                FailureContext::remote("fetch", remote, None),
                &out.stderr,
            ))
        }
    }

    fn remote_branch_exists(&self, remote: &str, branch: &str) -> Result<bool, KbError> {
        let reference = format!("refs/remotes/{}/{}", remote, branch);
        self.probe(&["show-ref", "--verify", "--quiet", &reference])
    }

    fn merge_ff_only(&self, remote: &str, branch: &str) -> Result<(), KbError> {
        let upstream = format!("{}/{}", remote, branch);
        let out = self.run(
            &["merge", "--ff-only", "--quiet", &upstream],
            Budget::Local,
            "merge",
        )?;
        if out.status.success() {
            Ok(())
        } else {
            Err(classify_failure(
                FailureContext::remote("merge", remote, Some(branch)),
                &out.stderr,
            ))
        }
    }

    fn push(&self, remote: &str, branch: &str, set_upstream: bool) -> Result<(), KbError> {
        let refspec = format!("refs/heads/{0}:refs/heads/{0}", branch);
        let mut args = vec!["push", "--porcelain"];
        if set_upstream {
            args.push("--set-upstream");
        }
        args.push(remote);
        args.push(&refspec);

        let out = self.run(&args, Budget::Network, "push")?;
        if out.status.success() {
            return Ok(());
        }
        // --porcelain reports rejections on stdout
        let text = format!("{}\n{}", out.stderr, out.stdout);
        Err(classify_failure(
            FailureContext::remote("push", remote, Some(branch)),
            &text,
        ))
    }

    fn stash_push(&self, message: &str) -> Result<Option<String>, KbError> {
        let before = self.stash_head()?;
        let out = self.run(
            &["stash", "push", "--include-untracked", "-m", message],
            Budget::Local,
            "stash",
        )?;
        if !out.status.success() {
            return Err(KbError::StashFailure {
                reason: out.stderr.trim().to_string(),
                token: None,
            });
        }
        let after = self.stash_head()?;
        if after.is_some() && after != before {
            Ok(after)
        } else {
            Ok(None)
        }
    }

    fn stash_pop(&self, token: &str) -> Result<(), KbError> {
        let list = self.local(&["stash", "list", "--format=%H"])?;
        let index = list
            .lines()
            .position(|sha| sha.trim() == token)
            .ok_or_else(|| KbError::StashFailure {
                reason: format!("stash {} no longer exists", token),
                token: None,
            })?;

        let entry = format!("stash@{{{}}}", index);
        let out = self.run(&["stash", "pop", &entry], Budget::Local, "stash")?;
        if out.status.success() {
            return Ok(());
        }

        // `pop` keeps the entry when it cannot apply cleanly.
        let still_there = self
            .local(&["stash", "list", "--format=%H"])?
            .lines()
            .any(|sha| sha.trim() == token);
        Err(KbError::StashFailure {
            reason: format!("{}{}", out.stderr.trim(), out.stdout.trim()),
            token: still_there.then(|| token.to_string()),
        })
    }

    fn branch_exists(&self, branch: &str) -> Result<bool, KbError> {
        let reference = format!("refs/heads/{}", branch);
        self.probe(&["show-ref", "--verify", "--quiet", &reference])
    }

    fn create_branch(&self, branch: &str) -> Result<(), KbError> {
        self.local(&["branch", branch]).map(|_| ())
    }

    fn checkout(&self, branch: &str, create: bool) -> Result<(), KbError> {
        if create {
            self.local(&["checkout", "-q", "-b", branch]).map(|_| ())
        } else {
            self.local(&["checkout", "-q", branch]).map(|_| ())
        }
    }
}
