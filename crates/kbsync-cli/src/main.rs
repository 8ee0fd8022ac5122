//! # kbsync CLI
//!
//! Command-line interface for knowledge base sync.
//!
//! This binary provides operator access to `kbsync-core`: reference checks
//! and repairs, the sync protocol and the git safety primitives.
//! Run `kbsync --help` for usage information.

mod cli;
pub mod ui;

use std::process::ExitCode;

fn main() -> ExitCode {
    cli::run()
}
