//! HTTPS credential injection and redaction.

use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use secrecy::{ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};

/// Username and token injected into HTTPS remote URLs.
#[derive(Clone)]
pub struct HttpsCredentials {
    username: String,
    token: Arc<SecretBox<String>>,
}

impl HttpsCredentials {
    /// Create credentials from a username and an already-wrapped token.
    pub fn new(username: impl Into<String>, token: Arc<SecretBox<String>>) -> Self {
        Self {
            username: username.into(),
            token,
        }
    }

    /// Create credentials from plain strings.
    pub fn from_plain(username: impl Into<String>, token: impl Into<String>) -> Self {
        Self::new(username, Arc::new(SecretBox::new(Box::new(token.into()))))
    }

    /// The username.
    pub fn username(&self) -> &str {
        &self.username
    }

    pub(crate) fn token(&self) -> &str {
        self.token.expose_secret()
    }
}

impl fmt::Debug for HttpsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpsCredentials")
            .field("username", &self.username)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// What happened to one remote during credential injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CredentialStatus {
    /// The URL was rewritten.
    Updated,
    /// The URL already carried these credentials.
    Unchanged,
    /// SSH, local path, or a URL carrying other credentials.
    Skipped,
    /// Reading or writing the URL failed.
    Failed,
}

impl std::fmt::Display for CredentialStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Updated => "updated",
            Self::Unchanged => "unchanged",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        })
    }
}

/// Per-remote outcome of [`GitSafety::ensure_https_credentials`](super::GitSafety::ensure_https_credentials).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialOutcome {
    /// Remote name.
    pub remote: String,
    /// What happened.
    pub status: CredentialStatus,
    /// Redacted URL or error message.
    pub detail: String,
}

/// Compute the URL with credentials injected.
///
/// Returns `None` when the URL must be left alone: it is not HTTPS, or its
/// authority already carries user information.
pub fn inject_credentials(url: &str, credentials: &HttpsCredentials) -> Option<String> {
    let rest = strip_prefix_ignore_case(url, "https://")?;
    let authority_end = rest.find('/').unwrap_or(rest.len());
    if rest[..authority_end].contains('@') {
        return None;
    }

    Some(format!(
        "https://{}:{}@{}",
        percent_encode_userinfo(credentials.username()),
        percent_encode_userinfo(credentials.token()),
        rest
    ))
}

/// Whether `url` already carries exactly these credentials.
pub fn has_credentials(url: &str, credentials: &HttpsCredentials) -> bool {
    let Some(rest) = strip_prefix_ignore_case(url, "https://") else {
        return false;
    };
    let authority_end = rest.find('/').unwrap_or(rest.len());
    let expected = format!(
        "{}:{}@",
        percent_encode_userinfo(credentials.username()),
        percent_encode_userinfo(credentials.token())
    );
    rest[..authority_end].starts_with(&expected)
}

/// Replace user information in every URL inside `text` with `***`.
pub fn redact_url(text: &str) -> String {
    USERINFO.replace_all(text, "${1}***@").into_owned()
}

static USERINFO: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)([a-z][a-z0-9+.-]*://)[^/@\s]+@").expect("Invalid regex")
});

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() >= prefix.len() && s[..prefix.len()].eq_ignore_ascii_case(prefix) {
        Some(&s[prefix.len()..])
    } else {
        None
    }
}

/// Percent-encode everything outside RFC 3986 `unreserved`.
fn percent_encode_userinfo(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
