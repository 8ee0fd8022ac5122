//! Markdown change collection.
//!
//! During a sync only the dirty set is scanned: [`collect_changes`] asks git
//! for the working-tree status and keeps markdown paths. The full-tree walk
//! in [`collect_all_markdown`] exists for explicit maintenance runs.

use std::collections::BTreeMap;
use std::path::Path;

use ignore::WalkBuilder;
use serde::{Deserialize, Serialize};

use crate::constants::{is_markdown_path, should_ignore_dir};
use crate::errors::KbError;
use crate::git::port::StatusEntry;
use crate::repository::Repository;

/// How a file differs from the last commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeKind {
    /// New file in the index.
    Added,
    /// Content (or type) changed, or the target of a rename/copy.
    Modified,
    /// Removed, or the source of a rename.
    Deleted,
    /// Not tracked by git.
    Untracked,
}

impl ChangeKind {
    /// Whether the file still exists and can be scanned.
    pub fn is_present(self) -> bool {
        !matches!(self, Self::Deleted)
    }
}

/// One changed markdown file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    /// Path relative to the repository root, `/`-separated.
    pub path: String,
    /// Change kind.
    pub kind: ChangeKind,
}

fn kind_of(entry: &StatusEntry) -> Option<ChangeKind> {
    if entry.is_untracked() {
        return Some(ChangeKind::Untracked);
    }
    if entry.index == '!' {
        return None;
    }
    // Worktree deletions win over index additions: the file is gone.
    if entry.worktree == 'D' || entry.index == 'D' {
        return Some(ChangeKind::Deleted);
    }
    match entry.index {
        'A' => Some(ChangeKind::Added),
        'R' | 'C' | 'M' | 'T' | 'U' => Some(ChangeKind::Modified),
        _ => match entry.worktree {
            'M' | 'T' | 'A' | 'U' => Some(ChangeKind::Modified),
            _ => None,
        },
    }
}

/// Turn status entries into sorted, deduplicated markdown change records.
pub fn changes_from_status(entries: &[StatusEntry]) -> Vec<ChangeRecord> {
    let mut by_path: BTreeMap<String, ChangeKind> = BTreeMap::new();

    for entry in entries {
        if entry.index == 'R' {
            if let Some(ref orig) = entry.orig_path {
                if is_markdown_path(Path::new(orig)) {
                    by_path.entry(orig.clone()).or_insert(ChangeKind::Deleted);
                }
            }
        }

        let Some(kind) = kind_of(entry) else {
            continue;
        };
        if is_markdown_path(Path::new(&entry.path)) {
            by_path.insert(entry.path.clone(), kind);
        }
    }

    by_path
        .into_iter()
        .map(|(path, kind)| ChangeRecord { path, kind })
        .collect()
}

/// Markdown files that differ from the last commit, including untracked ones.
///
/// # Errors
///
/// Returns [`KbError::RepositoryState`] if git cannot read the repository.
pub fn collect_changes(repo: &Repository) -> Result<Vec<ChangeRecord>, KbError> {
    let entries = repo.vcs().status()?;
    let changes = changes_from_status(&entries);
    tracing::debug!(
        "{} status entries, {} markdown changes",
        entries.len(),
        changes.len()
    );
    Ok(changes)
}

/// Every markdown file under the root, as `Modified` records.
///
/// Respects `.gitignore` and skips the always-ignored directories.
pub fn collect_all_markdown(repo: &Repository) -> Result<Vec<ChangeRecord>, KbError> {
    let mut records = Vec::new();

    for entry in tree_walker(repo.root()).build() {
        let entry = entry.map_err(|e| KbError::Other(e.into()))?;
        if !entry.file_type().map_or(false, |t| t.is_file()) {
            continue;
        }
        if !is_markdown_path(entry.path()) {
            continue;
        }
        if let Some(path) = repo.relative(entry.path()) {
            records.push(ChangeRecord {
                path,
                kind: ChangeKind::Modified,
            });
        }
    }

    records.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(records)
}

/// Walker over the knowledge base honoring ignore files.
pub(crate) fn tree_walker(root: &Path) -> WalkBuilder {
    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(false)
        .git_ignore(true)
        .git_global(false)
        .git_exclude(true)
        .require_git(false)
        .follow_links(false)
        .filter_entry(|entry| {
            let is_dir = entry.file_type().map_or(false, |t| t.is_dir());
            !(is_dir && entry.file_name().to_str().map_or(false, should_ignore_dir))
        });
    builder
}
