//! Git safety layer.
//!
//! - [`port`]: the [`VersionControlPort`] trait every git backend implements
//! - [`cli`]: the production backend, driving the `git` executable
//! - [`classify`]: maps git failures onto [`crate::KbError`] variants
//! - [`credentials`]: HTTPS credential injection and URL redaction
//! - [`safety`]: [`GitSafety`], the locked session all mutations go through

pub mod classify;
pub mod cli;
pub mod credentials;
#[cfg(test)]
pub(crate) mod fake;
pub mod port;
pub mod safety;

pub use cli::GitCli;
pub use credentials::{redact_url, CredentialOutcome, CredentialStatus, HttpsCredentials};
pub use port::{StatusEntry, VersionControlPort};
pub use safety::{GitSafety, PullOutcome, StashToken, SwitchOutcome};
