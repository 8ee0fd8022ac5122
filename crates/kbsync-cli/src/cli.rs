//! CLI definition and command dispatch for kbsync.
//!
//! This module defines the command-line interface using `clap` and provides
//! the `run()` function that dispatches commands to the library.
//!
//! ## Configuration Precedence
//!
//! Configuration is resolved with the following precedence (highest to lowest):
//! 1. CLI flags (e.g., `--config`, `--username`, `--token`)
//! 2. Environment variables (`KBSYNC_CONFIG`, `KBSYNC_GIT_USERNAME`, `KBSYNC_GIT_TOKEN`)
//! 3. Repository config (`<repo>/.kbsync/config.yaml`)
//! 4. Global config (`~/.kbsync/config.yaml` or path from `--config`)
//! 5. Built-in defaults

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};

use crate::ui::format::{format_duration_ms, format_timestamp, plural};
use crate::ui::table::{self, FindingRow};
use crate::ui::{ColorMode, MessageType, Progress, ProgressMode, Style};

use kbsync_core::{
    BranchName, ErrorKind, FixScope, GitSafety, GlobalConfig, IntegrityReport, KbError,
    ProjectConfig, PullOutcome, Repository, SyncConfig, SyncEngine, SyncReport,
};

// ============================================================================
// CLI Definition
// ============================================================================

/// Version string including git commit hash
const VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("GIT_HASH"), ")");

/// Knowledge base sync – link integrity and safe git automation
#[derive(Parser, Debug)]
#[command(name = "kbsync")]
#[command(author, version = VERSION, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true, env = "KBSYNC_VERBOSE")]
    pub verbose: bool,

    /// Suppress progress and informational messages
    #[arg(short, long, global = true, env = "KBSYNC_QUIET")]
    pub quiet: bool,

    /// Repository root (default: current directory)
    #[arg(long, global = true, env = "KBSYNC_REPO", default_value = ".")]
    pub repo: PathBuf,

    /// Path to global configuration file (default: ~/.kbsync/config.yaml)
    #[arg(long, global = true, env = "KBSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Color output mode: always, never, or auto (default: auto)
    #[arg(long, global = true, env = "KBSYNC_COLOR", default_value = "auto")]
    pub color: String,

    /// HTTPS username injected into remote URLs
    #[arg(long, global = true, env = "KBSYNC_GIT_USERNAME")]
    pub username: Option<String>,

    /// HTTPS token injected into remote URLs
    #[arg(long, global = true, env = "KBSYNC_GIT_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check image and link references without changing anything
    #[command(after_help = r#"EXAMPLES:
    # Check markdown files changed since the last commit
    kbsync check

    # Check every markdown file in the repository
    kbsync check --all

    # Output as JSON for scripting
    kbsync check --json | jq '.referencesMissing'
"#)]
    Check {
        /// Scan every markdown file instead of only changed ones
        #[arg(long)]
        all: bool,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Repair broken references in place (no commit)
    #[command(after_help = r#"EXAMPLES:
    # Fix changed files
    kbsync fix

    # Preview fixes for the whole repository
    kbsync fix --all --dry-run
"#)]
    Fix {
        /// Scan every markdown file instead of only changed ones
        #[arg(long)]
        all: bool,

        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Validate, fix, commit and push pending changes
    #[command(after_help = r#"EXAMPLES:
    # Sync the checked-out branch to the configured remote
    kbsync sync -m "Agent notes"

    # Sync onto a specific branch (uncommitted work is stashed and restored)
    kbsync sync -m "Agent notes" --branch notes

    # Machine-readable report
    kbsync sync -m "Agent notes" --json
"#)]
    Sync {
        /// Commit message
        #[arg(short, long)]
        message: String,

        /// Remote to push to (default: sync.remote)
        #[arg(long)]
        remote: Option<String>,

        /// Branch to commit on (default: sync.branch, else the current branch)
        #[arg(short, long)]
        branch: Option<String>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Fast-forward the local branch from its remote
    #[command(after_help = r#"EXAMPLES:
    kbsync pull
    kbsync pull --remote origin --branch main
"#)]
    Pull {
        /// Remote to pull from (default: sync.remote)
        #[arg(long)]
        remote: Option<String>,

        /// Branch to pull (default: sync.branch, else the current branch)
        #[arg(short, long)]
        branch: Option<String>,
    },

    /// Push the local branch, setting upstream tracking
    Push {
        /// Remote to push to (default: sync.remote)
        #[arg(long)]
        remote: Option<String>,

        /// Branch to push (default: sync.branch, else the current branch)
        #[arg(short, long)]
        branch: Option<String>,
    },

    /// Switch branches without losing uncommitted work
    #[command(after_help = r#"EXAMPLES:
    # Uncommitted changes are stashed, the branch is created if missing,
    # and the stash is re-applied on the new branch
    kbsync switch notes
"#)]
    Switch {
        /// Branch to switch to
        branch: String,
    },

    /// Inject the configured HTTPS credentials into remote URLs
    #[command(after_help = r#"EXAMPLES:
    KBSYNC_GIT_USERNAME=kb-bot KBSYNC_GIT_TOKEN=... kbsync credentials
"#)]
    Credentials {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Inspect kbsync configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Validate configuration files and report warnings
    Check,

    /// Show resolved configuration (token redacted)
    #[command(after_help = r#"EXAMPLES:
    kbsync config show
    kbsync config show --json
"#)]
    Show {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

// ============================================================================
// Run function
// ============================================================================

/// Run the CLI application.
///
/// # Returns
///
/// `ExitCode::SUCCESS` when the command succeeded, `ExitCode::FAILURE` on
/// errors, failed syncs and checks that found missing references.
pub fn run() -> ExitCode {
    let cli = Cli::parse();

    // Always show warnings (config issues, unfixable references, push
    // failures); debug output only with --verbose
    let log_level = if cli.verbose { "debug" } else { "warn" };
    let filter = format!("kbsync_core={},kbsync_cli={}", log_level, log_level);
    tracing_subscriber::fmt()
        .with_env_filter(&filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let color_mode = cli.color.parse().unwrap_or(ColorMode::Auto);
    let style = Style::new(color_mode);

    match dispatch(&cli, &style) {
        Ok(code) => code,
        Err(e) => {
            let kb = e.downcast_ref::<KbError>();
            let cause = e.chain().nth(1).map(|c| c.to_string());
            eprintln!(
                "{}",
                style.error_with_context(
                    &e.to_string(),
                    cause.as_deref(),
                    kb.and_then(|k| hint_for(k.kind())),
                )
            );
            ExitCode::FAILURE
        }
    }
}

fn dispatch(cli: &Cli, style: &Style) -> anyhow::Result<ExitCode> {
    let open = || -> anyhow::Result<Repository> {
        let settings = load_settings(cli)?;
        Repository::open(&cli.repo, settings)
            .with_context(|| format!("Cannot open repository at {}", cli.repo.display()))
    };
    let engine = SyncEngine::new();

    match &cli.command {
        Command::Check { all, json } => handle_check(style, &engine, &open()?, scope(*all), *json),
        Command::Fix { all, dry_run, json } => {
            handle_fix(style, &engine, &open()?, scope(*all), *dry_run, *json)
        }
        Command::Sync {
            message,
            remote,
            branch,
            json,
        } => handle_sync(
            cli,
            style,
            &engine,
            &open()?,
            message,
            remote.as_deref(),
            branch.as_deref(),
            *json,
        ),
        Command::Pull { remote, branch } => {
            handle_pull(cli, style, &open()?, remote.as_deref(), branch.as_deref())
        }
        Command::Push { remote, branch } => {
            handle_push(cli, style, &open()?, remote.as_deref(), branch.as_deref())
        }
        Command::Switch { branch } => handle_switch(style, &open()?, branch),
        Command::Credentials { json } => handle_credentials(style, &open()?, *json),
        Command::Config { action } => handle_config(cli, style, action),
    }
}

fn load_settings(cli: &Cli) -> Result<SyncConfig, KbError> {
    let settings = SyncConfig::load(&cli.repo, cli.config.as_deref())?
        .with_credentials(cli.username.clone(), cli.token.clone());
    tracing::debug!(
        "Resolved settings: remote={} branch={:?} credentials={}",
        settings.remote,
        settings.branch.as_ref().map(|b| b.as_str()),
        settings.credentials().is_some()
    );
    Ok(settings)
}

fn scope(all: bool) -> FixScope {
    if all {
        FixScope::All
    } else {
        FixScope::Changed
    }
}

/// Actionable hint for an error kind.
fn hint_for(kind: ErrorKind) -> Option<&'static str> {
    Some(match kind {
        ErrorKind::Authentication => {
            "Check --username/--token (KBSYNC_GIT_USERNAME, KBSYNC_GIT_TOKEN) or your SSH keys"
        }
        ErrorKind::DivergedBranch => "Pull and resolve the divergence manually, then sync again",
        ErrorKind::DirtyWorkingTree => "Commit your changes first, e.g. with `kbsync sync`",
        ErrorKind::DetachedHead => "Check out a branch or pass --branch",
        ErrorKind::LockUnavailable => {
            "Another kbsync operation holds this repository; retry later"
        }
        ErrorKind::Network => "Check connectivity to the remote; the operation can be retried",
        ErrorKind::StashFailure => "Inspect `git stash list` and restore the named stash manually",
        ErrorKind::RepositoryState => "Run kbsync inside a git working tree or pass --repo",
        ErrorKind::RemoteNotFound => "Add the remote with `git remote add` or pass --remote",
        ErrorKind::Configuration => "Check ~/.kbsync/config.yaml and <repo>/.kbsync/config.yaml",
        ErrorKind::PathTraversal => "Only paths inside the repository can be staged",
        _ => return None,
    })
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ============================================================================
// Integrity commands
// ============================================================================

fn print_findings(style: &Style, report: &IntegrityReport) {
    let rows: Vec<FindingRow> = report.problems().map(FindingRow::from).collect();
    if !rows.is_empty() {
        println!();
        println!("{}", style.section("REFERENCES"));
        println!();
        println!("{}", table::render_findings_table(&rows));
    }
}

fn handle_check(
    style: &Style,
    engine: &SyncEngine,
    repo: &Repository,
    scope: FixScope,
    json: bool,
) -> anyhow::Result<ExitCode> {
    let report = engine.check(repo, scope)?;

    if json {
        print_json(&report)?;
    } else {
        println!(
            "{}",
            style.message(
                MessageType::Info,
                &format!(
                    "Checked {} in {}",
                    plural(report.references_checked, "reference"),
                    plural(report.files_scanned, "file")
                )
            )
        );
        print_findings(style, &report);
        if report.outside_root_warnings > 0 {
            println!(
                "{}",
                style.message(
                    MessageType::Warn,
                    &format!(
                        "{} outside the repository or media directories",
                        plural(report.outside_root_warnings, "reference")
                    )
                )
            );
        }
        if report.references_missing == 0 {
            println!("{}", style.message(MessageType::Ok, "No missing references"));
        } else {
            println!(
                "{}",
                style.message(
                    MessageType::Err,
                    &format!("{} missing", plural(report.references_missing, "reference"))
                )
            );
            println!(
                "{}",
                style.message(MessageType::Hint, "Run `kbsync fix` to repair them")
            );
        }
    }

    Ok(if report.references_missing == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn handle_fix(
    style: &Style,
    engine: &SyncEngine,
    repo: &Repository,
    scope: FixScope,
    dry_run: bool,
    json: bool,
) -> anyhow::Result<ExitCode> {
    let report = engine.fix(repo, scope, dry_run)?;

    if json {
        print_json(&report)?;
        return Ok(ExitCode::SUCCESS);
    }

    let verb = if dry_run { "Would update" } else { "Updated" };
    if report.files_touched.is_empty() {
        println!(
            "{}",
            style.message(
                MessageType::Ok,
                &format!("Nothing to fix in {}", plural(report.files_scanned, "file"))
            )
        );
    } else {
        println!(
            "{}",
            style.message(
                MessageType::Ok,
                &format!("{} {}", verb, plural(report.files_touched.len(), "file"))
            )
        );
        for file in &report.files_touched {
            println!("{}", style.list_item("~", &style.file_path(file)));
        }
        println!(
            "{}",
            style.message_detail("Fixed", &report.references_fixed.to_string())
        );
        println!(
            "{}",
            style.message_detail("Unfixable", &report.references_unfixable.to_string())
        );
    }
    print_findings(style, &report);

    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// Sync
// ============================================================================

#[allow(clippy::too_many_arguments)]
fn handle_sync(
    cli: &Cli,
    style: &Style,
    engine: &SyncEngine,
    repo: &Repository,
    message: &str,
    remote: Option<&str>,
    branch: Option<&str>,
    json: bool,
) -> anyhow::Result<ExitCode> {
    let branch = branch.map(BranchName::try_new).transpose()?;

    let progress = Progress::spinner("Syncing...", ProgressMode::detect(cli.quiet, json));
    let report = engine.auto_commit_and_push(repo, message, remote, branch.as_ref());
    progress.finish_clear();

    if json {
        print_json(&report)?;
    } else {
        print_sync_report(style, &report);
    }

    Ok(if report.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_sync_report(style: &Style, report: &SyncReport) {
    let headline = if !report.success {
        MessageType::Err
    } else if report.is_partial() {
        MessageType::Warn
    } else if report.no_op {
        MessageType::Info
    } else {
        MessageType::Ok
    };
    println!("{}", style.message(headline, &report.message));

    if let Some(ref branch) = report.branch {
        println!("{}", style.message_detail("Branch", branch));
    }
    if let Some(id) = report.commit.as_ref().and_then(|c| c.commit_id.as_deref()) {
        println!("{}", style.message_detail("Commit", &style.commit_id(id)));
    }
    if let Some(ref push) = report.push {
        println!("{}", style.message_detail("Push", &push.message));
    }
    if let Some(ref stash) = report.stash {
        println!("{}", style.message_detail("Stash", &stash.message));
    }
    println!(
        "{}",
        style.message_detail(
            "Started",
            &format!(
                "{} ({})",
                format_timestamp(report.started_at),
                format_duration_ms(report.duration_ms)
            )
        )
    );

    if !report.no_op && report.integrity.files_scanned > 0 {
        println!();
        println!(
            "{}",
            table::render_summary_table(&[
                ("Files scanned", report.integrity.files_scanned.to_string()),
                ("Files touched", report.files_touched().to_string()),
                ("References fixed", report.references_fixed().to_string()),
                ("Unfixable", report.references_unfixable().to_string()),
                (
                    "Outside root",
                    report.integrity.outside_root_warnings.to_string()
                ),
            ])
        );
    }
    print_findings(style, &report.integrity);

    if !report.credentials.is_empty() {
        println!();
        println!("{}", table::render_credentials_table(&report.credentials));
    }

    if let Some(hint) = report.error_kind.and_then(hint_for) {
        println!("{}", style.message(MessageType::Hint, hint));
    } else if let Some(kind) = report.push.as_ref().and_then(|p| p.error_kind) {
        if let Some(hint) = hint_for(kind) {
            println!("{}", style.message(MessageType::Hint, hint));
        }
    }
}

// ============================================================================
// Git safety commands
// ============================================================================

/// Explicit branch, else configured branch, else the checked-out branch.
fn target_branch(
    repo: &Repository,
    session: &GitSafety<'_>,
    branch: Option<&str>,
    operation: &str,
) -> Result<BranchName, KbError> {
    if let Some(name) = branch {
        return BranchName::try_new(name);
    }
    if let Some(configured) = repo.default_branch() {
        return Ok(configured.clone());
    }
    match session.current_branch()? {
        Some(current) => BranchName::try_new(current),
        None => Err(KbError::DetachedHead {
            operation: operation.to_string(),
        }),
    }
}

fn handle_pull(
    cli: &Cli,
    style: &Style,
    repo: &Repository,
    remote: Option<&str>,
    branch: Option<&str>,
) -> anyhow::Result<ExitCode> {
    let session = repo.session()?;
    let remote = remote.unwrap_or_else(|| repo.default_remote());
    let branch = target_branch(repo, &session, branch, "pull")?;

    let progress = Progress::spinner(
        &format!("Pulling {}/{}...", remote, branch),
        ProgressMode::detect(cli.quiet, false),
    );
    let outcome = session.pull(remote, &branch);
    progress.finish_clear();

    let text = match outcome? {
        PullOutcome::FastForwarded => format!("Up to date with {}/{}", remote, branch),
        PullOutcome::PublishedUpstream => {
            format!("{}/{} did not exist; published local {}", remote, branch, branch)
        }
    };
    println!("{}", style.message(MessageType::Ok, &text));
    Ok(ExitCode::SUCCESS)
}

fn handle_push(
    cli: &Cli,
    style: &Style,
    repo: &Repository,
    remote: Option<&str>,
    branch: Option<&str>,
) -> anyhow::Result<ExitCode> {
    let session = repo.session()?;
    let remote = remote.unwrap_or_else(|| repo.default_remote());
    let branch = target_branch(repo, &session, branch, "push")?;

    if let Some(credentials) = repo.credentials() {
        session.ensure_https_credentials(&credentials)?;
    }

    let progress = Progress::spinner(
        &format!("Pushing {} to {}...", branch, remote),
        ProgressMode::detect(cli.quiet, false),
    );
    let outcome = session.push(remote, &branch);
    progress.finish_clear();
    outcome?;

    println!(
        "{}",
        style.message(MessageType::Ok, &format!("Pushed {} to {}", branch, remote))
    );
    Ok(ExitCode::SUCCESS)
}

fn handle_switch(style: &Style, repo: &Repository, branch: &str) -> anyhow::Result<ExitCode> {
    let branch = BranchName::try_new(branch)?;
    let session = repo.session()?;
    let outcome = session.switch_branch(&branch)?;

    if !outcome.switched(&branch) {
        println!(
            "{}",
            style.message(MessageType::Info, &format!("Already on {}", branch))
        );
        return Ok(ExitCode::SUCCESS);
    }

    let created = if outcome.created { " (new branch)" } else { "" };
    println!(
        "{}",
        style.message(
            MessageType::Ok,
            &format!("Switched to {}{}", branch, created)
        )
    );

    if let Some(token) = outcome.stash {
        session
            .restore_stash(&token)
            .with_context(|| format!("Switched to {}, but uncommitted changes were not restored", branch))?;
        println!(
            "{}",
            style.message_detail("Restored", "uncommitted changes carried over")
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn handle_credentials(style: &Style, repo: &Repository, json: bool) -> anyhow::Result<ExitCode> {
    let credentials = repo.credentials().ok_or_else(|| KbError::InvalidConfiguration {
        message: "no HTTPS credentials configured".to_string(),
        hint: "Set git.username and git.token, or KBSYNC_GIT_USERNAME and KBSYNC_GIT_TOKEN"
            .to_string(),
    })?;

    let session = repo.session()?;
    let outcomes = session.ensure_https_credentials(&credentials)?;

    if json {
        print_json(&outcomes)?;
    } else if outcomes.is_empty() {
        println!("{}", style.message(MessageType::Info, "No remotes configured"));
    } else {
        println!("{}", table::render_credentials_table(&outcomes));
    }

    let failed = outcomes
        .iter()
        .any(|o| o.status == kbsync_core::CredentialStatus::Failed);
    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

// ============================================================================
// Config
// ============================================================================

fn handle_config(cli: &Cli, style: &Style, action: &ConfigAction) -> anyhow::Result<ExitCode> {
    match action {
        ConfigAction::Check => handle_config_check(cli, style),
        ConfigAction::Show { json } => handle_config_show(cli, style, *json),
    }
}

/// Validate configuration files and report warnings.
fn handle_config_check(cli: &Cli, style: &Style) -> anyhow::Result<ExitCode> {
    let global_path = cli.config.clone().or_else(GlobalConfig::default_path);
    let project_path = ProjectConfig::config_path_for_repository(&cli.repo);

    for (name, path) in [("global", global_path), ("repository", Some(project_path))] {
        let shown = path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(no home directory)".to_string());
        let status = if path.as_ref().is_some_and(|p| p.exists()) {
            "found"
        } else {
            "not present, using defaults"
        };
        println!("  {} {} ({})", name, shown, status);
    }
    println!();

    let settings = load_settings(cli)?;
    let warnings = settings.validate()?;
    if warnings.is_empty() {
        println!("{}", style.message(MessageType::Ok, "Configuration is valid"));
    } else {
        println!(
            "{}",
            style.message(
                MessageType::Warn,
                &format!("Configuration is valid with {}", plural(warnings.len(), "warning"))
            )
        );
        for warning in &warnings {
            println!("  • {}", warning);
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Show resolved configuration. The token is never printed.
fn handle_config_show(cli: &Cli, style: &Style, json: bool) -> anyhow::Result<ExitCode> {
    let settings = load_settings(cli)?;

    let resolved = serde_json::json!({
        "remote": settings.remote,
        "branch": settings.branch.as_ref().map(|b| b.to_string()),
        "username": settings.username,
        "token": settings.token.as_ref().map(|_| "***"),
        "networkTimeoutSecs": settings.network_timeout.as_secs(),
        "localTimeoutSecs": settings.local_timeout.as_secs(),
        "lockTimeoutSecs": settings.lock_timeout.as_secs(),
        "skipCodeBlocks": settings.skip_code_blocks,
        "mediaDirs": settings
            .media_dirs
            .iter()
            .map(|d| d.display().to_string())
            .collect::<Vec<_>>(),
    });

    if json {
        print_json(&resolved)?;
    } else {
        println!("{}", style.section("CONFIGURATION"));
        println!();
        if let Some(map) = resolved.as_object() {
            for (key, value) in map {
                let shown = match value {
                    serde_json::Value::Null => "(unset)".to_string(),
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                println!("  {}", style.key_value(key, &shown));
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}
