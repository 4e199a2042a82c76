mod defaults;
mod models;
mod run;
mod validate;

use std::path::Path;

use coincast_core::RawParameters;
use serde_json::Value;

use crate::cli::{Cli, Command, ConfigArgs};
use crate::error::CliError;
use crate::metadata::Metadata;
use crate::output::{Envelope, EnvelopeError};

/// What a command hands back to `main` for printing.
pub enum CommandOutput {
    /// Plain JSON document, printed as-is.
    Document(Value),
    /// Standard envelope.
    Envelope(CommandResult),
    /// Already written to stdout as NDJSON; only the exit code remains.
    Streamed { exit_code: u8 },
}

pub struct CommandResult {
    pub metadata: Metadata,
    pub data: Value,
    pub errors: Vec<EnvelopeError>,
    /// Exit code reported when `errors` is not empty.
    pub failure_exit_code: u8,
}

impl CommandResult {
    pub fn ok(metadata: Metadata, data: Value) -> Self {
        Self {
            metadata,
            data,
            errors: Vec::new(),
            failure_exit_code: 3,
        }
    }

    pub fn with_errors(mut self, errors: Vec<EnvelopeError>, exit_code: u8) -> Self {
        self.errors.extend(errors);
        self.failure_exit_code = exit_code;
        self
    }

    pub fn exit_code(&self) -> u8 {
        if self.errors.is_empty() {
            0
        } else {
            self.failure_exit_code
        }
    }

    pub fn into_envelope(self) -> Envelope<Value> {
        Envelope::with_errors(self.metadata.into_envelope_meta(), self.data, self.errors)
    }
}

pub async fn run(cli: &Cli) -> Result<CommandOutput, CliError> {
    match &cli.command {
        Command::Defaults => defaults::run(),
        Command::Validate(args) => validate::run(args),
        Command::Models => models::run(),
        Command::Run(args) => run::run(args).await,
    }
}

/// Reads raw parameters from `--config`, or the defaults when it is absent.
pub(crate) fn load_parameters(args: &ConfigArgs) -> Result<RawParameters, CliError> {
    match &args.config {
        Some(path) => read_parameters(path),
        None => Ok(RawParameters::default()),
    }
}

fn read_parameters(path: &Path) -> Result<RawParameters, CliError> {
    let contents = std::fs::read_to_string(path).map_err(|source| CliError::Config {
        path: path.display().to_string(),
        source,
    })?;
    Ok(RawParameters::from_json(&contents)?)
}
