//! Reference extraction.
//!
//! Recognizes inline images `![alt](path)` and links `[label](path)`, with
//! an optional title and optional angle brackets around the destination.
//! Nested brackets inside the label are not supported. Fenced code blocks
//! are scanned unless [`ReferenceParser::skip_code_blocks`] is enabled.

use std::collections::VecDeque;
use std::sync::LazyLock;

use regex::Regex;

use super::{Reference, ReferenceKind};

static REFERENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(!?)\[[^\]\n]*\]\([ \t]*(?:<([^<>\n]*)>|([^\s()<>]+))(?:[ \t]+("[^"\n]*"|'[^'\n]*'|\([^()\n]*\)))?[ \t]*\)"#,
    )
    .expect("Invalid regex")
});

/// Extracts references from the markdown of one file.
///
/// The parser is a plain value: every call to
/// [`references`](Self::references) starts a fresh lazy scan.
#[derive(Debug, Clone)]
pub struct ReferenceParser {
    file: String,
    skip_code_blocks: bool,
}

impl ReferenceParser {
    /// Parser for the file at `file` (relative to the repository root).
    pub fn new(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            skip_code_blocks: false,
        }
    }

    /// Ignore references inside fenced code blocks.
    pub fn skip_code_blocks(mut self, skip: bool) -> Self {
        self.skip_code_blocks = skip;
        self
    }

    /// Lazily iterate over the references in `text`.
    ///
    /// Same-page anchors (`#section`) and empty destinations are not emitted.
    pub fn references<'p, 't>(&'p self, text: &'t str) -> References<'p, 't> {
        References {
            parser: self,
            lines: text.split_inclusive('\n'),
            offset: 0,
            line_no: 0,
            fence: None,
            pending: VecDeque::new(),
        }
    }
}

/// Iterator returned by [`ReferenceParser::references`].
#[derive(Debug)]
pub struct References<'p, 't> {
    parser: &'p ReferenceParser,
    lines: std::str::SplitInclusive<'t, char>,
    offset: usize,
    line_no: usize,
    fence: Option<(char, usize)>,
    pending: VecDeque<Reference>,
}

/// Opening or closing fence marker of a line: its character and run length.
fn fence_marker(line: &str) -> Option<(char, usize)> {
    let indent = line.len() - line.trim_start_matches(' ').len();
    if indent > 3 {
        return None;
    }
    let rest = &line[indent..];
    let ch = rest.chars().next().filter(|c| *c == '`' || *c == '~')?;
    let run = rest.chars().take_while(|c| *c == ch).count();
    (run >= 3).then_some((ch, run))
}

impl References<'_, '_> {
    /// Update fence state; returns true when the line belongs to a code block.
    fn in_code_block(&mut self, line: &str) -> bool {
        match (self.fence, fence_marker(line)) {
            (None, Some(marker)) => {
                self.fence = Some(marker);
                true
            }
            (Some((open_ch, open_run)), Some((ch, run))) => {
                let rest = line.trim_start_matches(' ').trim_start_matches(ch);
                if ch == open_ch && run >= open_run && rest.trim().is_empty() {
                    self.fence = None;
                }
                true
            }
            (Some(_), None) => true,
            (None, None) => false,
        }
    }

    fn scan_line(&mut self, line: &str, line_offset: usize) {
        for caps in REFERENCE_RE.captures_iter(line) {
            let (Some(whole), Some(bang)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let Some(dest) = caps.get(2).or_else(|| caps.get(3)) else {
                continue;
            };

            let destination = dest.as_str();
            if destination.is_empty() || destination.starts_with('#') {
                continue;
            }

            let (path, anchor) = match destination.find('#') {
                Some(i) => (&destination[..i], Some(destination[i + 1..].to_string())),
                None => (destination, None),
            };

            let title = caps.get(4).map(|t| {
                let t = t.as_str();
                t[1..t.len() - 1].to_string()
            });

            let kind = if bang.as_str().is_empty() {
                ReferenceKind::Link
            } else {
                ReferenceKind::Image
            };

            let start = line_offset + dest.start();
            self.pending.push_back(Reference {
                file: self.parser.file.clone(),
                line: self.line_no,
                column: line[..whole.start()].chars().count() + 1,
                kind,
                path: path.to_string(),
                anchor,
                title,
                span: start..start + path.len(),
                end: line_offset + whole.end(),
            });
        }
    }
}

impl Iterator for References<'_, '_> {
    type Item = Reference;

    fn next(&mut self) -> Option<Reference> {
        loop {
            if let Some(reference) = self.pending.pop_front() {
                return Some(reference);
            }

            let raw = self.lines.next()?;
            let line_offset = self.offset;
            self.offset += raw.len();
            self.line_no += 1;

            let line = raw.trim_end_matches('\n').trim_end_matches('\r');
            if self.parser.skip_code_blocks && self.in_code_block(line) {
                continue;
            }
            self.scan_line(line, line_offset);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Vec<Reference> {
        ReferenceParser::new("topics/a.md").references(text).collect()
    }

    #[test]
    fn test_image_and_link() {
        let refs = parse("# Title\n\nSee ![x](media/img.png) and [Page](page1.md).\n");
        assert_eq!(refs.len(), 2);

        assert_eq!(refs[0].kind, ReferenceKind::Image);
        assert_eq!(refs[0].path, "media/img.png");
        assert_eq!(refs[0].line, 3);
        assert_eq!(refs[0].column, 5);
        assert_eq!(refs[0].file, "topics/a.md");

        assert_eq!(refs[1].kind, ReferenceKind::Link);
        assert_eq!(refs[1].path, "page1.md");
        assert_eq!(refs[1].line, 3);
    }

    #[test]
    fn test_span_points_at_path() {
        let text = "intro\n[Page](sub/page.md#top \"Title\") tail\n";
        let refs = parse(text);
        let r = &refs[0];
        assert_eq!(&text[r.span.clone()], "sub/page.md");
        assert_eq!(r.anchor.as_deref(), Some("top"));
        assert_eq!(r.title.as_deref(), Some("Title"));
        assert_eq!(&text[r.end..], " tail\n");
    }

    #[test]
    fn test_angle_brackets() {
        let text = "[Doc](<my notes/file.md>)";
        let refs = parse(text);
        assert_eq!(refs[0].path, "my notes/file.md");
        assert_eq!(&text[refs[0].span.clone()], "my notes/file.md");
    }

    #[test]
    fn test_anchor_only_and_empty_are_skipped() {
        assert!(parse("[Up](#top) and [Empty]()").is_empty());
    }

    #[test]
    fn test_external_references_are_emitted() {
        let refs = parse("[Site](https://example.com) [Mail](mailto:a@b.c)");
        assert_eq!(refs.len(), 2);
        assert!(refs.iter().all(Reference::is_external));
    }

    #[test]
    fn test_multiple_on_one_line_and_crlf() {
        let refs = parse("a\r\n![one](1.png) ![two](2.png)\r\n[three](3.md)");
        let paths: Vec<_> = refs.iter().map(|r| (r.line, r.path.as_str())).collect();
        assert_eq!(paths, vec![(2, "1.png"), (2, "2.png"), (3, "3.md")]);
    }

    #[test]
    fn test_column_counts_characters() {
        let refs = parse("héllo [x](y.md)");
        assert_eq!(refs[0].column, 7);
    }

    #[test]
    fn test_code_blocks_scanned_by_default() {
        let text = "```\n[in](code.md)\n```\n[out](real.md)\n";
        assert_eq!(parse(text).len(), 2);
    }

    #[test]
    fn test_skip_code_blocks() {
        let text = "```md\n[in](code.md)\n```\n~~~~\n[also](x.md)\n~~~\nstill\n~~~~\n[out](real.md)\n";
        let refs: Vec<_> = ReferenceParser::new("a.md")
            .skip_code_blocks(true)
            .references(text)
            .collect();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].path, "real.md");
        assert_eq!(refs[0].line, 9);
    }

    #[test]
    fn test_restartable() {
        let parser = ReferenceParser::new("a.md");
        let text = "[a](a.md) [b](b.md)";
        let first: Vec<_> = parser.references(text).collect();
        let second: Vec<_> = parser.references(text).collect();
        assert_eq!(first, second);
        assert_eq!(parser.references(text).take(1).count(), 1);
    }
}
