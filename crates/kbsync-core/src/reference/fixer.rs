//! Auto-repair of missing references.
//!
//! A missing reference is rewritten to the closest existing file with the
//! same base name. When no such file exists, a marker comment is appended
//! after the reference instead. The fixer only produces new text; writing
//! it back is up to the caller.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::parser::ReferenceParser;
use super::resolver::{percent_decode, Resolver};
use super::{Reference, ReferenceKind, ReferenceStatus};
use crate::changeset::tree_walker;
use crate::constants::BROKEN_REFERENCE_MARKER;
use crate::errors::KbError;

// ============================================================================
// CandidateIndex
// ============================================================================

/// Files of the working tree grouped by base name.
#[derive(Debug, Clone, Default)]
pub struct CandidateIndex {
    by_name: HashMap<String, Vec<PathBuf>>,
}

impl CandidateIndex {
    /// Walk the tree under `root`, honoring ignore files.
    pub fn build(root: &Path) -> Result<Self, KbError> {
        let mut index = Self::default();
        for entry in tree_walker(root).build() {
            let entry = entry.map_err(|e| KbError::Other(e.into()))?;
            if entry.file_type().map_or(false, |t| t.is_file()) {
                index.insert(entry.into_path());
            }
        }
        tracing::debug!("Indexed {} file names under {}", index.by_name.len(), root.display());
        Ok(index)
    }

    /// Add one absolute file path.
    pub fn insert(&mut self, path: PathBuf) {
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            self.by_name.entry(name.to_string()).or_default().push(path);
        }
    }

    /// All files named exactly `name`.
    pub fn candidates(&self, name: &str) -> &[PathBuf] {
        self.by_name.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// What the fixer decided for one reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixOutcome {
    /// The reference as found.
    #[serde(flatten)]
    pub reference: Reference,
    /// Final status.
    pub status: ReferenceStatus,
    /// Destination path as originally written.
    pub original: String,
    /// New destination path, for fixed references.
    pub replacement: Option<String>,
    /// Marker comment, for unfixable references.
    pub marker: Option<String>,
    /// Whether this reference changed the document text.
    pub changed: bool,
}

/// A rewritten document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedDocument {
    /// Owning file, relative to the root.
    pub file: String,
    /// Text after fixing (identical to the input when nothing changed).
    pub text: String,
    /// One outcome per reference, in document order.
    pub outcomes: Vec<FixOutcome>,
    changed: bool,
}

impl FixedDocument {
    /// Whether the text differs from the input.
    pub fn changed(&self) -> bool {
        self.changed
    }
}

// ============================================================================
// Fixer
// ============================================================================

/// Classifies and repairs the references of a document.
#[derive(Debug)]
pub struct Fixer<'a> {
    root: &'a Path,
    resolver: Resolver<'a>,
    index: &'a CandidateIndex,
    media_dirs: Vec<PathBuf>,
    skip_code_blocks: bool,
}

impl<'a> Fixer<'a> {
    /// Fixer for a canonical root and a prebuilt candidate index.
    pub fn new(root: &'a Path, index: &'a CandidateIndex) -> Self {
        Self {
            root,
            resolver: Resolver::new(root),
            index,
            media_dirs: Vec::new(),
            skip_code_blocks: false,
        }
    }

    /// Restrict images (and their candidates) to these directories.
    pub fn with_media_dirs(mut self, dirs: &[PathBuf]) -> Self {
        self.resolver = self.resolver.with_media_dirs(dirs);
        self.media_dirs = dirs.iter().map(|d| self.root.join(d)).collect();
        self
    }

    /// Ignore references inside fenced code blocks.
    pub fn skip_code_blocks(mut self, skip: bool) -> Self {
        self.skip_code_blocks = skip;
        self
    }

    /// Classify and repair every reference of `text`.
    pub fn fix_document(&self, file: &str, text: &str) -> FixedDocument {
        let parser = ReferenceParser::new(file).skip_code_blocks(self.skip_code_blocks);
        let mut edits: Vec<(std::ops::Range<usize>, String)> = Vec::new();
        let mut outcomes = Vec::new();

        for reference in parser.references(text) {
            let classification = self.resolver.classify(&reference);
            let original = reference.path.clone();

            if classification.status != ReferenceStatus::Missing {
                outcomes.push(FixOutcome {
                    reference,
                    status: classification.status,
                    original,
                    replacement: None,
                    marker: None,
                    changed: false,
                });
                continue;
            }

            if let Some(candidate) = self.best_candidate(&reference) {
                let replacement = self.render_path(&reference, text, &candidate);
                tracing::info!(
                    "{}:{}: `{}` -> `{}`",
                    reference.file,
                    reference.line,
                    original,
                    replacement
                );
                edits.push((reference.span.clone(), replacement.clone()));
                outcomes.push(FixOutcome {
                    reference,
                    status: ReferenceStatus::Fixed,
                    original,
                    replacement: Some(replacement),
                    marker: None,
                    changed: true,
                });
                continue;
            }

            let already_marked = text[reference.end..]
                .trim_start_matches([' ', '\t'])
                .starts_with(BROKEN_REFERENCE_MARKER);
            if !already_marked {
                tracing::warn!(
                    "{}:{}: no file named like `{}`, marking as broken",
                    reference.file,
                    reference.line,
                    original
                );
                edits.push((
                    reference.end..reference.end,
                    format!(" {}", BROKEN_REFERENCE_MARKER),
                ));
            }
            outcomes.push(FixOutcome {
                reference,
                status: ReferenceStatus::Unfixable,
                original,
                replacement: None,
                marker: Some(BROKEN_REFERENCE_MARKER.to_string()),
                changed: !already_marked,
            });
        }

        let changed = !edits.is_empty();
        let mut rewritten = text.to_string();
        edits.sort_by(|a, b| b.0.start.cmp(&a.0.start));
        for (range, replacement) in edits {
            rewritten.replace_range(range, &replacement);
        }

        FixedDocument {
            file: file.to_string(),
            text: rewritten,
            outcomes,
            changed,
        }
    }

    fn best_candidate(&self, reference: &Reference) -> Option<PathBuf> {
        let name = reference.file_name()?;
        let mut candidates: Vec<&PathBuf> = self.index.candidates(name).iter().collect();
        if candidates.is_empty() {
            if let Some(decoded) = percent_decode(name).filter(|d| d != name) {
                candidates = self.index.candidates(&decoded).iter().collect();
            }
        }

        if reference.kind == ReferenceKind::Image && !self.media_dirs.is_empty() {
            candidates.retain(|c| self.media_dirs.iter().any(|d| c.starts_with(d)));
        }

        let owner_dir = self
            .root
            .join(&reference.file)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.to_path_buf());

        candidates
            .into_iter()
            .filter_map(|c| relative_path(&owner_dir, c).map(|rel| (rank(&rel), c)))
            .min_by(|(ra, a), (rb, b)| ra.cmp(rb).then_with(|| compare_paths(a, b)))
            .map(|(_, c)| c.clone())
    }

    /// Relative path text to write for `candidate`.
    fn render_path(&self, reference: &Reference, text: &str, candidate: &Path) -> String {
        let owner_dir = self
            .root
            .join(&reference.file)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.root.to_path_buf());
        let rel = relative_path(&owner_dir, candidate).unwrap_or_default();
        // `%` first so the escapes below survive; `#` would start an anchor
        let joined = rel.join("/").replace('%', "%25").replace('#', "%23");

        let in_angle_brackets = reference.span.start > 0
            && text.as_bytes().get(reference.span.start - 1) == Some(&b'<');
        if in_angle_brackets {
            joined
        } else {
            joined
                .replace(' ', "%20")
                .replace('(', "%28")
                .replace(')', "%29")
        }
    }
}

/// `(number of ..,  number of components)`; smaller is closer.
fn rank(rel: &[String]) -> (usize, usize) {
    (rel.iter().filter(|c| *c == "..").count(), rel.len())
}

fn compare_paths(a: &Path, b: &Path) -> Ordering {
    a.to_string_lossy().cmp(&b.to_string_lossy())
}

/// Components leading from directory `from` to `to`.
fn relative_path(from: &Path, to: &Path) -> Option<Vec<String>> {
    let from: Vec<Component<'_>> = from.components().collect();
    let to: Vec<Component<'_>> = to.components().collect();
    let common = from
        .iter()
        .zip(to.iter())
        .take_while(|(a, b)| a == b)
        .count();
    if common == 0 {
        return None;
    }

    let mut parts: Vec<String> = std::iter::repeat("..".to_string())
        .take(from.len() - common)
        .collect();
    for component in &to[common..] {
        parts.push(component.as_os_str().to_str()?.to_string());
    }
    (!parts.is_empty()).then_some(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    struct Kb {
        _temp: TempDir,
        root: PathBuf,
    }

    impl Kb {
        fn new(files: &[&str]) -> Self {
            let temp = TempDir::new().unwrap();
            let root = temp.path().canonicalize().unwrap();
            for f in files {
                let p = root.join(f);
                fs::create_dir_all(p.parent().unwrap()).unwrap();
                fs::write(p, "x").unwrap();
            }
            Self { _temp: temp, root }
        }

        fn fix(&self, file: &str, text: &str) -> FixedDocument {
            let index = CandidateIndex::build(&self.root).unwrap();
            Fixer::new(&self.root, &index).fix_document(file, text)
        }
    }

    #[test]
    fn test_scenario_image_moved_to_root_media() {
        let kb = Kb::new(&["media/img.png", "topics/a.md"]);
        let doc = kb.fix("topics/a.md", "![x](media/img.png)\n");
        assert_eq!(doc.text, "![x](../media/img.png)\n");
        assert_eq!(doc.outcomes[0].status, ReferenceStatus::Fixed);
        assert_eq!(doc.outcomes[0].original, "media/img.png");
        assert_eq!(doc.outcomes[0].replacement.as_deref(), Some("../media/img.png"));
    }

    #[test]
    fn test_scenario_page_in_subdirectory() {
        let kb = Kb::new(&["topics/sub/page1.md", "topics/a.md"]);
        let doc = kb.fix("topics/a.md", "[Page](page1.md)\n");
        assert_eq!(doc.text, "[Page](sub/page1.md)\n");
    }

    #[test]
    fn test_scenario_no_candidate_marks_once() {
        let kb = Kb::new(&["topics/a.md"]);
        let doc = kb.fix("topics/a.md", "see [Gone](gone.md) here\n");
        assert_eq!(
            doc.text,
            "see [Gone](gone.md) <!-- TODO: broken reference --> here\n"
        );
        assert_eq!(doc.outcomes[0].status, ReferenceStatus::Unfixable);
        assert!(doc.changed());

        let again = kb.fix("topics/a.md", &doc.text);
        assert_eq!(again.text, doc.text);
        assert!(!again.changed());
        assert_eq!(again.text.matches("TODO: broken reference").count(), 1);
    }

    #[test]
    fn test_fix_is_idempotent() {
        let kb = Kb::new(&["media/img.png", "topics/sub/page1.md"]);
        let first = kb.fix("topics/a.md", "![x](media/img.png) [p](page1.md) [g](gone.md)\n");
        let second = kb.fix("topics/a.md", &first.text);
        assert!(first.changed());
        assert!(!second.changed());
        assert_eq!(first.text, second.text);
    }

    #[test]
    fn test_preserves_anchor_title_and_brackets() {
        let kb = Kb::new(&["topics/sub/page one.md"]);
        let doc = kb.fix(
            "topics/a.md",
            "[A](<page one.md#part-2> \"Part two\") [B](page%20one.md#x)\n",
        );
        assert_eq!(
            doc.text,
            "[A](<sub/page one.md#part-2> \"Part two\") [B](sub/page%20one.md#x)\n"
        );
    }

    #[test]
    fn test_escapes_hash_and_percent_in_file_names() {
        let kb = Kb::new(&["topics/sub/c#notes.md", "topics/sub/50%.md"]);
        let first = kb.fix("topics/a.md", "[n](old/c%23notes.md) [p](<old/50%.md>)\n");
        assert_eq!(first.text, "[n](sub/c%23notes.md) [p](<sub/50%25.md>)\n");

        let second = kb.fix("topics/a.md", &first.text);
        assert!(!second.changed());
        assert_eq!(second.text, first.text);
        assert!(second
            .outcomes
            .iter()
            .all(|o| o.status == ReferenceStatus::Ok));
    }

    #[test]
    fn test_prefers_fewest_parent_segments() {
        let kb = Kb::new(&["a/b/c/note.md", "note.md", "topics/x/y/z/note.md"]);
        // from topics/: ../note.md has one `..`; x/y/z/note.md has none
        let doc = kb.fix("topics/a.md", "[n](missing/note.md)");
        assert_eq!(doc.text, "[n](x/y/z/note.md)");
    }

    #[test]
    fn test_prefers_fewest_components_then_lexicographic() {
        let kb = Kb::new(&["topics/b/img.png", "topics/a/img.png", "topics/a/deep/img.png"]);
        let doc = kb.fix("topics/index.md", "![i](img.png)");
        assert_eq!(doc.text, "![i](a/img.png)");

        // stable across runs
        for _ in 0..3 {
            assert_eq!(kb.fix("topics/index.md", "![i](img.png)").text, doc.text);
        }
    }

    #[test]
    fn test_never_touches_external_or_outside_root() {
        let kb = Kb::new(&["topics/a.md"]);
        let text = "[w](https://example.com/gone.md) [o](../../../../etc/hosts)\n";
        let doc = kb.fix("topics/a.md", text);
        assert_eq!(doc.text, text);
        assert_eq!(doc.outcomes[0].status, ReferenceStatus::External);
        assert_eq!(doc.outcomes[1].status, ReferenceStatus::OutsideRoot);
    }

    #[test]
    fn test_media_dirs_limit_image_candidates() {
        let kb = Kb::new(&["drafts/img.png", "media/img.png"]);
        let index = CandidateIndex::build(&kb.root).unwrap();
        let fixer = Fixer::new(&kb.root, &index).with_media_dirs(&[PathBuf::from("media")]);
        let doc = fixer.fix_document("drafts/sub/a.md", "![i](img.png)");
        assert_eq!(doc.text, "![i](../../media/img.png)");
    }

    #[test]
    fn test_multiple_edits_on_one_line() {
        let kb = Kb::new(&["media/a.png", "media/b.png"]);
        let doc = kb.fix("notes/x.md", "![a](a.png) [g](gone.md) ![b](b.png)");
        assert_eq!(
            doc.text,
            "![a](../media/a.png) [g](gone.md) <!-- TODO: broken reference --> ![b](../media/b.png)"
        );
    }

    #[test]
    fn test_relative_path() {
        let rel = relative_path(Path::new("/kb/topics"), Path::new("/kb/media/img.png")).unwrap();
        assert_eq!(rel, vec!["..", "media", "img.png"]);
        let rel = relative_path(Path::new("/kb"), Path::new("/kb/a.md")).unwrap();
        assert_eq!(rel, vec!["a.md"]);
    }
}
