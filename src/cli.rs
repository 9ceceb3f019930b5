//! CLI argument parsing for patch validation.
//!
//! The CLI stays thin: it binds the configuration surface and routes to the
//! command layer without embedding policy of its own.
use crate::cache::CacheLevel;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Root CLI entrypoint.
#[derive(Parser, Debug)]
#[command(
    name = "patchval",
    version,
    about = "Validate a candidate patch against a benchmark task in an isolated container",
    after_help = "Examples:\n  patchval run --datapoint ./data_points/astropy__astropy-11693.json\n  patchval run --datapoint https://example.org/task.json --max-workers 4 --cache-level none\n  patchval report --datapoint ./task.json --run-id run_00001754400000001234",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    #[command(subcommand)]
    pub command: Command,
}

/// Top-level commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    Run(RunArgs),
    Report(ReportArgs),
}

/// Run a full validation: build, execute, grade, report.
#[derive(Parser, Debug)]
#[command(about = "Run one validation end to end")]
pub struct RunArgs {
    /// Task description locator: a file path or http(s) URL
    #[arg(long, value_name = "LOCATOR")]
    pub datapoint: String,

    /// Model label bound to the submitted prediction
    #[arg(long, value_name = "NAME", default_value = "candidate")]
    pub model_name: String,

    /// Upper bound on concurrent task executions inside the executor
    #[arg(long, value_name = "N", default_value_t = 8)]
    pub max_workers: usize,

    /// Which image tiers survive the run
    #[arg(long, value_enum, default_value = "env")]
    pub cache_level: CacheLevel,

    /// Make images that pre-existed the run eligible for removal
    #[arg(long)]
    pub clean: bool,

    /// Rebuild images even when a matching one is present
    #[arg(long)]
    pub force_rebuild: bool,

    /// Process open-file-descriptor ceiling applied before the run
    #[arg(long, value_name = "N", default_value_t = 1700)]
    pub open_file_limit: u64,

    /// Per-task wall-clock execution bound, in seconds
    #[arg(long, value_name = "SECONDS", default_value_t = 1770)]
    pub timeout: u64,

    /// Tag selector for per-task instance images
    #[arg(long, value_name = "TAG", default_value = "latest")]
    pub instance_image_tag: String,

    /// Tag selector for shared environment images
    #[arg(long, value_name = "TAG", default_value = "latest")]
    pub env_image_tag: String,

    /// Directory the run report is written under (created if absent)
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub report_dir: PathBuf,

    /// Root directory for per-task logs and artifacts
    #[arg(long, value_name = "DIR", default_value = "logs/validation")]
    pub log_root: PathBuf,

    /// Build environment images before the worker pool starts
    #[arg(long)]
    pub prebuild_env: bool,

    /// Override the in-container test runner command (parsed shell-style;
    /// test identifiers are appended)
    #[arg(long, value_name = "CMD")]
    pub test_cmd: Option<String>,

    /// Emit a verbose transcript on stderr
    #[arg(long)]
    pub verbose: bool,
}

/// Re-synthesize the report for an already-executed run; never rebuilds or
/// re-runs anything.
#[derive(Parser, Debug)]
#[command(about = "Re-synthesize the report for a persisted run")]
pub struct ReportArgs {
    /// Task description locator: a file path or http(s) URL
    #[arg(long, value_name = "LOCATOR")]
    pub datapoint: String,

    /// Model label the run was executed under
    #[arg(long, value_name = "NAME", default_value = "candidate")]
    pub model_name: String,

    /// Identifier of the persisted run
    #[arg(long, value_name = "RUN_ID")]
    pub run_id: String,

    /// Directory the run report is written under (created if absent)
    #[arg(long, value_name = "DIR", default_value = ".")]
    pub report_dir: PathBuf,

    /// Root directory the run's logs were written under
    #[arg(long, value_name = "DIR", default_value = "logs/validation")]
    pub log_root: PathBuf,

    /// Emit a verbose transcript on stderr
    #[arg(long)]
    pub verbose: bool,
}
