//! CLI argument definitions for coincast.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `defaults` | Print the default parameters as JSON |
//! | `validate` | Validate a parameter file and list every violation |
//! | `models` | List the registered forecasters |
//! | `run` | Run the full pipeline against CoinGecko |
//!
//! # Global Options
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `--pretty` | `false` | Pretty-print JSON output |
//! | `--log-format` | `compact` | Log format on stderr (pretty, compact, json) |
//!
//! # Examples
//!
//! ```bash
//! coincast defaults > params.json
//! coincast validate --config params.json
//! coincast run --config params.json --allow-partial --pretty
//! coincast run --stream
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::logging::LogFormat;

/// Staged cryptocurrency forecasting pipeline.
#[derive(Debug, Parser)]
#[command(
    name = "coincast",
    author,
    version,
    about = "Staged cryptocurrency price forecasting pipeline",
    long_about = "coincast collects daily market history, preprocesses it, trains every \
registered forecaster and ranks them on a held-out test split.\n\
\n\
Log verbosity follows COINCAST_LOG (or RUST_LOG), default 'info'.\n\
The CoinGecko API key is read from COINCAST_COINGECKO_API_KEY."
)]
pub struct Cli {
    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    /// Log output format (written to stderr).
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Compact)]
    pub log_format: LogFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Print the default parameters, ready to edit and pass to --config.
    Defaults,

    /// Validate parameters and report every violation at once.
    ///
    ///   coincast validate --config params.json
    Validate(ConfigArgs),

    /// List the registered forecasters.
    Models,

    /// Run collecting, preprocessing, training and evaluation.
    ///
    ///   coincast run --config params.json
    ///   coincast run --allow-partial --max-retries 4 --stream
    Run(RunArgs),
}

#[derive(Debug, Clone, Args)]
pub struct ConfigArgs {
    /// JSON parameter file; defaults are used when omitted.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Continue with the remaining assets when some cannot be fetched.
    #[arg(long, default_value_t = false)]
    pub allow_partial: bool,

    /// Per-attempt fetch timeout in milliseconds.
    #[arg(long, default_value_t = 30_000)]
    pub timeout_ms: u64,

    /// Retries after a transient fetch failure.
    #[arg(long, default_value_t = 2)]
    pub max_retries: u32,

    /// Assets fetched concurrently.
    #[arg(long, default_value_t = 4)]
    pub max_concurrency: usize,

    /// Emit NDJSON progress events followed by the report.
    #[arg(long, default_value_t = false)]
    pub stream: bool,
}
