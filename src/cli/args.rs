//! CLI argument definitions
//!
//! All Clap derive structs for `trialkit` command-line parsing.

use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

use crate::timeline::session::Platform;

// ============================================================================
// Root CLI
// ============================================================================

/// Timed multi-phase trial runner with resilient result submission.
#[derive(Parser, Debug)]
#[command(name = "trialkit", author, version, about)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all non-error output.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Color output control.
    #[arg(long, default_value = "auto", global = true, env = "TRIALKIT_COLOR")]
    pub color: ColorChoice,

    /// Log line format.
    #[arg(long, default_value = "human", global = true, env = "TRIALKIT_LOG_FORMAT")]
    pub log_format: OutputFormat,
}

// ============================================================================
// Top-Level Commands
// ============================================================================

/// Top-level subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run an experiment, reading participant input from stdin.
    Run(RunArgs),

    /// Validate experiment files without running them.
    Validate(ValidateArgs),

    /// Display version information.
    Version(VersionArgs),
}

/// Arguments for `run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the experiment file.
    #[arg(short, long, default_value = "experiment.yaml", env = "TRIALKIT_CONFIG")]
    pub config: PathBuf,

    /// Result store base URL (overrides `submission.endpoint`).
    #[arg(long, env = "TRIALKIT_ENDPOINT")]
    pub endpoint: Option<String>,

    /// JSON file holding local participant state across runs.
    #[arg(long, env = "TRIALKIT_STATE_FILE")]
    pub state_file: Option<PathBuf>,

    /// Participant identifier.
    #[arg(long, conflicts_with = "query")]
    pub worker_id: Option<String>,

    /// Study / HIT / project identifier.
    #[arg(long, requires = "worker_id")]
    pub hit_id: Option<String>,

    /// Assignment / session identifier.
    #[arg(long, requires = "worker_id")]
    pub assignment_id: Option<String>,

    /// Recruitment platform of `--worker-id`.
    #[arg(long, requires = "worker_id", value_parser = parse_platform)]
    pub platform: Option<Platform>,

    /// Recruitment URL query string to read the identity from.
    #[arg(long)]
    pub query: Option<String>,

    /// Force a condition instead of sampling one.
    #[arg(long)]
    pub condition: Option<String>,

    /// Write structured session events (JSONL) to this file.
    #[arg(long, env = "TRIALKIT_EVENTS_FILE")]
    pub events: Option<PathBuf>,

    /// Expose Prometheus metrics on this port.
    #[arg(long, env = "TRIALKIT_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Print the session record instead of submitting it.
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for `validate`.
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Experiment files to validate.
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,

    /// Enable strict validation (warnings become errors).
    #[arg(long)]
    pub strict: bool,
}

/// Arguments for version display.
#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Output format.
    #[arg(short, long, default_value = "human")]
    pub format: OutputFormat,
}

// ============================================================================
// CLI-Local Enums
// ============================================================================

/// Color output choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ColorChoice {
    /// Auto-detect terminal support.
    #[default]
    Auto,
    /// Always use color.
    Always,
    /// Never use color.
    Never,
}

/// Output format for structured output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output.
    #[default]
    Human,
    /// JSON output.
    Json,
}

fn parse_platform(s: &str) -> Result<Platform, String> {
    s.parse()
}

// ============================================================================
// Tests
// ============================================================================
