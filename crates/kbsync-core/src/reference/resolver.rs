//! Reference resolution and classification.

use std::path::{Path, PathBuf};

use super::{Reference, ReferenceKind, ReferenceStatus};
use crate::repository::normalize_lexically;

/// Result of classifying one reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Status of the reference.
    pub status: ReferenceStatus,
    /// Absolute target path, when the reference points into the filesystem.
    pub resolved: Option<PathBuf>,
}

impl Classification {
    fn new(status: ReferenceStatus, resolved: Option<PathBuf>) -> Self {
        Self { status, resolved }
    }
}

/// Classifies references against the working tree rooted at `root`.
#[derive(Debug, Clone)]
pub struct Resolver<'a> {
    root: &'a Path,
    media_dirs: Vec<PathBuf>,
}

impl<'a> Resolver<'a> {
    /// Resolver for a canonical repository root.
    pub fn new(root: &'a Path) -> Self {
        Self {
            root,
            media_dirs: Vec::new(),
        }
    }

    /// Restrict images to these directories (relative to the root).
    pub fn with_media_dirs(mut self, dirs: &[PathBuf]) -> Self {
        self.media_dirs = dirs.iter().map(|d| self.root.join(d)).collect();
        self
    }

    /// Target path of a reference, folded and made absolute.
    ///
    /// Returns `None` when the path climbs out of the root. A leading `/`
    /// is taken relative to the root.
    pub fn target_of(&self, reference: &Reference) -> Option<PathBuf> {
        let joined = match reference.path.strip_prefix('/') {
            Some(from_root) => self.root.join(from_root),
            None => {
                let owner = self.root.join(&reference.file);
                owner.parent().unwrap_or(self.root).join(&reference.path)
            }
        };
        normalize_lexically(&joined).filter(|p| p.starts_with(self.root))
    }

    /// Classify one reference.
    pub fn classify(&self, reference: &Reference) -> Classification {
        if reference.is_external() {
            return Classification::new(ReferenceStatus::External, None);
        }

        let Some(target) = self.target_of(reference) else {
            return Classification::new(ReferenceStatus::OutsideRoot, None);
        };

        let existing = if target.exists() {
            Some(target.clone())
        } else {
            percent_decode(&reference.path)
                .filter(|decoded| *decoded != reference.path)
                .and_then(|decoded| {
                    let mut alt = reference.clone();
                    alt.path = decoded;
                    self.target_of(&alt)
                })
                .filter(|p| p.exists())
        };

        let Some(found) = existing else {
            return Classification::new(ReferenceStatus::Missing, Some(target));
        };

        // symlinks may still lead out of the tree
        let inside = found
            .canonicalize()
            .map(|c| c.starts_with(self.root))
            .unwrap_or(false);
        if !inside {
            return Classification::new(ReferenceStatus::OutsideRoot, Some(found));
        }

        if reference.kind == ReferenceKind::Image
            && !self.media_dirs.is_empty()
            && !self.media_dirs.iter().any(|d| found.starts_with(d))
        {
            return Classification::new(ReferenceStatus::OutsideRoot, Some(found));
        }

        Classification::new(ReferenceStatus::Ok, Some(found))
    }
}

/// Decode `%XX` escapes. Returns `None` for malformed escapes or invalid UTF-8.
pub fn percent_decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = input.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8(out).ok()
}
