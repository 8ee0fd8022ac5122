//! Mapping of git's stderr onto [`KbError`] variants.
//!
//! Git reports most failures only as text. The patterns below assume the
//! `C` locale, which [`GitCli`](super::cli::GitCli) forces for every call.

use crate::errors::KbError;

const AUTH_PATTERNS: &[&str] = &[
    "authentication failed",
    "invalid username or password",
    "could not read username",
    "could not read password",
    "permission denied (publickey",
    "http basic: access denied",
    "the requested url returned error: 401",
    "the requested url returned error: 403",
    "terminal prompts disabled",
];

const REMOTE_PATTERNS: &[&str] = &[
    "no such remote",
    "does not appear to be a git repository",
    "repository not found",
];

const DIVERGED_PATTERNS: &[&str] = &[
    "non-fast-forward",
    "[rejected]",
    "not possible to fast-forward",
    "fetch first",
    "diverging branches",
    "updates were rejected",
];

const NETWORK_PATTERNS: &[&str] = &[
    "could not resolve host",
    "unable to access",
    "connection timed out",
    "connection refused",
    "operation timed out",
    "network is unreachable",
    "the remote end hung up unexpectedly",
];

/// Context of a failed git call.
#[derive(Debug, Clone, Copy)]
pub struct FailureContext<'a> {
    /// Subcommand as shown to users (`push`, `fetch`, …).
    pub operation: &'a str,
    /// Remote involved, if any.
    pub remote: Option<&'a str>,
    /// Branch involved, if any.
    pub branch: Option<&'a str>,
}

impl<'a> FailureContext<'a> {
    /// Context for a local command.
    pub fn local(operation: &'a str) -> Self {
        Self {
            operation,
            remote: None,
            branch: None,
        }
    }

    /// Context for a command talking to `remote`.
    pub fn remote(operation: &'a str, remote: &'a str, branch: Option<&'a str>) -> Self {
        Self {
            operation,
            remote: Some(remote),
            branch,
        }
    }
}

/// Classify a failed git invocation.
///
/// `stderr` must already be redacted. Remote-specific kinds are only produced
/// when the context names a remote.
pub fn classify_failure(ctx: FailureContext<'_>, stderr: &str) -> KbError {
    let lower = stderr.to_ascii_lowercase();
    let reason = first_meaningful_line(stderr);
    let matches = |patterns: &[&str]| patterns.iter().any(|p| lower.contains(p));

    if let Some(remote) = ctx.remote {
        if matches(AUTH_PATTERNS) {
            return KbError::Authentication {
                remote: remote.to_string(),
                reason,
            };
        }
        if matches(REMOTE_PATTERNS) {
            return KbError::RemoteNotFound(remote.to_string());
        }
        if matches(DIVERGED_PATTERNS) {
            return KbError::DivergedBranch {
                remote: remote.to_string(),
                branch: ctx.branch.unwrap_or_default().to_string(),
                reason,
            };
        }
        if matches(NETWORK_PATTERNS) {
            return KbError::Network {
                operation: ctx.operation.to_string(),
                reason,
            };
        }
    } else if lower.contains("no such remote") {
        // `git remote get-url` and friends
        return KbError::RemoteNotFound(reason);
    }

    if lower.contains("not a git repository") {
        return KbError::RepositoryState {
            path: std::path::PathBuf::from("."),
            reason,
        };
    }

    KbError::Git {
        command: ctx.operation.to_string(),
        stderr: stderr.trim().to_string(),
    }
}

/// The most informative line of git's stderr.
///
/// Prefers `fatal:`/`error:` lines over hints and progress output.
fn first_meaningful_line(stderr: &str) -> String {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    lines
        .iter()
        .find(|l| l.starts_with("fatal:") || l.starts_with("error:") || l.starts_with("! ["))
        .or_else(|| lines.iter().find(|l| !l.starts_with("hint:")))
        .map(|l| l.to_string())
        .unwrap_or_else(|| "git exited with an error".to_string())
}
