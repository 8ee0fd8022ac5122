//! Table rendering for CLI output using comfy-table.
//!
//! ## Tables Overview
//!
//! | Command | Table Function |
//! |---------|----------------|
//! | `kbsync check`, `kbsync fix`, `kbsync sync` | `render_findings_table()` |
//! | `kbsync credentials` | `render_credentials_table()` |
//! | `kbsync sync` | `render_summary_table()` |

use comfy_table::presets::NOTHING;
use comfy_table::{Cell, CellAlignment, ColumnConstraint, ContentArrangement, Table, Width};

use kbsync_core::{CredentialOutcome, FixOutcome, ReferenceKind};

use super::color::terminal_width;
use super::format::{truncate_path, truncate_str};

/// One reference finding, flattened for display.
#[derive(Debug, Clone)]
pub struct FindingRow {
    /// `file:line:column`
    pub location: String,
    /// `image` or `link`
    pub kind: &'static str,
    /// Status label
    pub status: String,
    /// Destination as written
    pub target: String,
    /// Replacement path or marker note
    pub detail: String,
}

impl From<&FixOutcome> for FindingRow {
    fn from(outcome: &FixOutcome) -> Self {
        let reference = &outcome.reference;
        let detail = match (&outcome.replacement, &outcome.marker) {
            (Some(replacement), _) => format!("-> {}", replacement),
            (None, Some(_)) if outcome.changed => "marked".to_string(),
            (None, Some(_)) => "already marked".to_string(),
            (None, None) => String::new(),
        };
        Self {
            location: format!("{}:{}:{}", reference.file, reference.line, reference.column),
            kind: match reference.kind {
                ReferenceKind::Image => "image",
                ReferenceKind::Link => "link",
            },
            status: outcome.status.to_string(),
            target: outcome.original.clone(),
            detail,
        }
    }
}

fn new_table() -> Table {
    let mut table = Table::new();
    table.load_preset(NOTHING);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_width(u16::try_from(terminal_width()).unwrap_or(u16::MAX));
    table
}

/// Render reference findings.
///
/// # Example Output
///
/// ```text
/// LOCATION             KIND    STATUS      TARGET             DETAIL
/// topics/a.md:3:1      image   fixed       media/diagram.png  -> ../media/diagram.png
/// topics/a.md:9:12     link    unfixable   gone.md            marked
/// ```
pub fn render_findings_table(rows: &[FindingRow]) -> String {
    if rows.is_empty() {
        return String::new();
    }

    let mut table = new_table();
    table.set_header(vec![
        Cell::new("LOCATION"),
        Cell::new("KIND"),
        Cell::new("STATUS"),
        Cell::new("TARGET"),
        Cell::new("DETAIL"),
    ]);
    table.set_constraints(vec![
        ColumnConstraint::LowerBoundary(Width::Fixed(12)), // LOCATION
        ColumnConstraint::LowerBoundary(Width::Fixed(5)),  // KIND
        ColumnConstraint::LowerBoundary(Width::Fixed(9)),  // STATUS
        ColumnConstraint::LowerBoundary(Width::Fixed(10)), // TARGET
        ColumnConstraint::LowerBoundary(Width::Fixed(6)),  // DETAIL
    ]);

    for row in rows {
        table.add_row(vec![
            Cell::new(truncate_path(&row.location, 40)),
            Cell::new(row.kind),
            Cell::new(&row.status),
            Cell::new(truncate_path(&row.target, 40)),
            Cell::new(truncate_str(&row.detail, 48)),
        ]);
    }

    table.trim_fmt().to_string()
}

/// Render per-remote credential outcomes.
///
/// # Example Output
///
/// ```text
/// REMOTE    STATUS     URL
/// origin    updated    https://***@github.com/acme/kb.git
/// backup    skipped    git@github.com:acme/kb.git
/// ```
pub fn render_credentials_table(outcomes: &[CredentialOutcome]) -> String {
    if outcomes.is_empty() {
        return String::new();
    }

    let mut table = new_table();
    table.set_header(vec![Cell::new("REMOTE"), Cell::new("STATUS"), Cell::new("URL")]);

    for outcome in outcomes {
        table.add_row(vec![
            Cell::new(&outcome.remote),
            Cell::new(outcome.status),
            Cell::new(truncate_str(&outcome.detail, 72)),
        ]);
    }

    table.trim_fmt().to_string()
}

/// Render a simple key-value summary table.
///
/// # Example Output
///
/// ```text
/// METRIC              VALUE
/// Files touched           2
/// References fixed        3
/// ```
pub fn render_summary_table(metrics: &[(&str, String)]) -> String {
    if metrics.is_empty() {
        return String::new();
    }

    let mut table = new_table();
    table.set_header(vec![
        Cell::new("METRIC"),
        Cell::new("VALUE").set_alignment(CellAlignment::Right),
    ]);
    table.set_constraints(vec![
        ColumnConstraint::LowerBoundary(Width::Fixed(18)), // METRIC
        ColumnConstraint::LowerBoundary(Width::Fixed(8)),  // VALUE
    ]);

    for (key, value) in metrics {
        table.add_row(vec![
            Cell::new(*key),
            Cell::new(value).set_alignment(CellAlignment::Right),
        ]);
    }

    table.trim_fmt().to_string()
}
