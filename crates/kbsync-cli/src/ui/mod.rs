//! # CLI UI Module
//!
//! Styling and formatting layer for kbsync CLI output.
//!
//! Output is meant to be read by people at a terminal and by the agents that
//! drive the tool, so every command also supports `--json`. Colors respect
//! `NO_COLOR` and `--color`.
//!
//! ## Module Structure
//!
//! - `color`: Color mode detection and terminal capability checks
//! - `style`: Message types, prefixes, and styling functions
//! - `format`: Utility formatters (durations, counts, truncation)
//! - `table`: Table rendering with comfy-table
//! - `progress`: Spinners for git and network operations

pub mod color;
pub mod format;
pub mod progress;
pub mod style;
pub mod table;

pub use color::ColorMode;
pub use progress::{Progress, ProgressMode};
pub use style::{MessageType, Style};
