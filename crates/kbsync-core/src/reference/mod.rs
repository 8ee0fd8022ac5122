//! Markdown reference integrity.
//!
//! - [`parser`]: extracts image and link references from markdown text
//! - [`resolver`]: classifies each reference against the working tree
//! - [`fixer`]: rewrites missing references or marks them as broken

pub mod fixer;
pub mod parser;
pub mod resolver;

use std::ops::Range;

use serde::{Deserialize, Serialize};

pub use fixer::{CandidateIndex, FixOutcome, FixedDocument, Fixer};
pub use parser::ReferenceParser;
pub use resolver::{Classification, Resolver};

/// Image (`![alt](path)`) or link (`[label](path)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReferenceKind {
    Image,
    Link,
}

/// One reference found in a markdown document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reference {
    /// Owning file, relative to the repository root.
    pub file: String,
    /// 1-based line number.
    pub line: usize,
    /// 1-based character column of the opening `!` or `[`.
    pub column: usize,
    /// Image or link.
    pub kind: ReferenceKind,
    /// Destination path as written, without anchor, title or angle brackets.
    pub path: String,
    /// Fragment after `#`, without the `#`.
    pub anchor: Option<String>,
    /// Link title, without quotes.
    pub title: Option<String>,
    /// Byte range of `path` in the document.
    #[serde(skip)]
    pub span: Range<usize>,
    /// Byte offset just past the closing `)`.
    #[serde(skip)]
    pub end: usize,
}

impl Reference {
    /// Whether the destination carries a URI scheme (`https:`, `mailto:`, …)
    /// or is protocol-relative.
    pub fn is_external(&self) -> bool {
        is_external_target(&self.path)
    }

    /// Base name of the target path.
    pub fn file_name(&self) -> Option<&str> {
        self.path
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty() && *name != "." && *name != "..")
    }
}

/// Whether a destination names something outside the filesystem.
pub(crate) fn is_external_target(target: &str) -> bool {
    if target.starts_with("//") {
        return true;
    }
    match target.find(':') {
        // single letters are drive prefixes, not schemes
        Some(idx) if idx >= 2 => {
            let scheme = &target[..idx];
            scheme.starts_with(|c: char| c.is_ascii_alphabetic())
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
        }
        _ => false,
    }
}

/// Classification of one reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReferenceStatus {
    /// Target exists inside the root.
    Ok,
    /// URI with a scheme; never checked or touched.
    External,
    /// Target does not exist.
    Missing,
    /// Target lies outside the root or outside every media directory.
    OutsideRoot,
    /// Was missing and has been rewritten to an existing file.
    Fixed,
    /// Was missing, no candidate exists; a marker was added.
    Unfixable,
}

impl std::fmt::Display for ReferenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::External => "external",
            Self::Missing => "missing",
            Self::OutsideRoot => "outside-root",
            Self::Fixed => "fixed",
            Self::Unfixable => "unfixable",
        };
        f.write_str(s)
    }
}
