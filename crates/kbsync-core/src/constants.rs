//! Common constants used throughout kbsync-core.
//!
//! This module centralizes directory names, file names, defaults and the
//! fixer marker so they stay consistent across the codebase.

use std::path::Path;

// ============================================================================
// Directory Names
// ============================================================================

/// The name of the per-repository kbsync directory.
///
/// Holds `config.yaml` with repository-level overrides.
pub const KBSYNC_DIR: &str = ".kbsync";

/// The name of the global kbsync configuration directory (`~/.kbsync`).
pub const KBSYNC_HOME_DIR: &str = ".kbsync";

/// Directories that are never searched for fix candidates or scanned.
///
/// These hold VCS metadata, tool state, or generated content that a
/// knowledge base never links into.
pub const ALWAYS_IGNORED_DIRS: &[&str] = &[
    ".git",
    ".kbsync",
    "target",
    "node_modules",
    ".venv",
    "venv",
    "__pycache__",
    ".obsidian",
    ".trash",
];

/// Check if a directory name should always be ignored.
#[inline]
pub fn should_ignore_dir(name: &str) -> bool {
    ALWAYS_IGNORED_DIRS.contains(&name)
}

// ============================================================================
// Markdown
// ============================================================================

/// File extensions treated as markdown documents (compared case-insensitively).
pub const MARKDOWN_EXTENSIONS: &[&str] = &["md", "markdown"];

/// Check if a path names a markdown document.
pub fn is_markdown_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| {
            MARKDOWN_EXTENSIONS
                .iter()
                .any(|m| m.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

/// Marker appended after a reference that could not be repaired.
pub const BROKEN_REFERENCE_MARKER: &str = "<!-- TODO: broken reference -->";

// ============================================================================
// Git defaults
// ============================================================================

/// Default remote name.
pub const DEFAULT_REMOTE: &str = "origin";

/// Default branch name.
pub const DEFAULT_BRANCH: &str = "main";

/// Lock file created inside `.git/` to serialize processes.
pub const LOCK_FILENAME: &str = "kbsync.lock";

/// Default timeout for network git operations (`fetch`, `pull`, `push`).
pub const DEFAULT_NETWORK_TIMEOUT_SECS: u64 = 60;

/// Default timeout for local git operations.
pub const DEFAULT_LOCAL_TIMEOUT_SECS: u64 = 120;

/// Default time a sync waits for the repository lock.
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 300;

/// Message prefix used for stashes created by a branch switch.
pub const STASH_MESSAGE_PREFIX: &str = "kbsync: switch to";

// ============================================================================
// Configuration Filenames
// ============================================================================

/// The name of the global and repository configuration files.
pub const CONFIG_FILENAME: &str = "config.yaml";

// ============================================================================
// Tests
// ============================================================================
