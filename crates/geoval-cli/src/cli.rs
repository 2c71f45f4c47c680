//! CLI argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use colorchoice_clap::Color;

use geoval_model::StageKind;

#[derive(Parser)]
#[command(
    name = "geoval",
    version,
    about = "Geospatial dataset validator - check vector datasets against rule tables",
    long_about = "Validate geospatial vector datasets in five ordered stages:\n\
                  table, schema, geometry, attribute and relation checks.\n\n\
                  Rules and thresholds are read from CSV tables in a rules directory."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Adjust log verbosity (-v for info, -vv for debug, -q for errors only).
    #[command(flatten)]
    pub verbosity: Verbosity<WarnLevel>,

    /// Control ANSI color output (auto, always, never).
    #[command(flatten)]
    pub color: Color,

    /// Explicit log level (overrides -v/-q flags).
    #[arg(long = "log-level", value_enum, global = true)]
    pub log_level: Option<LogLevelArg>,

    /// Log output format (pretty for human, json for machine parsing).
    #[arg(
        long = "log-format",
        value_enum,
        default_value = "pretty",
        global = true
    )]
    pub log_format: LogFormatArg,

    /// Write logs to a file instead of stderr.
    #[arg(long = "log-file", value_name = "PATH", global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Validate one or more datasets.
    Validate(ValidateArgs),

    /// List the validation stages in execution order.
    Stages,
}

#[derive(Parser)]
pub struct ValidateArgs {
    /// Dataset files (JSON) to validate, in order.
    #[arg(value_name = "TARGET", required = true)]
    pub targets: Vec<PathBuf>,

    /// Directory holding the rule tables and `criteria.csv`.
    #[arg(long = "rules", value_name = "DIR")]
    pub rules: PathBuf,

    /// Pipeline settings file (TOML).
    #[arg(long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Skip a stage, by number (1-5) or id (e.g. `geometry`). Repeatable.
    #[arg(long = "skip-stage", value_name = "STAGE")]
    pub skip_stage: Vec<StageKind>,

    /// Restrict validation to these rule items (table ids). Repeatable.
    #[arg(long = "only", value_name = "ITEM")]
    pub only: Vec<String>,

    /// Write the full JSON report to this file.
    #[arg(long = "output", value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Run history file used for duration predictions (overrides the config).
    #[arg(long = "history", value_name = "FILE")]
    pub history: Option<PathBuf>,

    /// Do not draw the progress bar.
    #[arg(long = "no-progress")]
    pub no_progress: bool,
}

/// CLI log level choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// CLI log format choices.
#[derive(Clone, Copy, ValueEnum)]
pub enum LogFormatArg {
    Pretty,
    Compact,
    Json,
}
