use coincast_core::{ParameterSet, RawParameters, ValidationError};
use serde_json::json;

use crate::cli::ConfigArgs;
use crate::error::CliError;
use crate::metadata::Metadata;
use crate::output::EnvelopeError;

use super::{load_parameters, CommandOutput, CommandResult};

const SCHEMA_VERSION: &str = "coincast.validate.v1";

pub fn run(args: &ConfigArgs) -> Result<CommandOutput, CliError> {
    let metadata = Metadata::start(SCHEMA_VERSION);
    let raw = load_parameters(args)?;
    Ok(CommandOutput::Envelope(check(metadata, raw)))
}

fn check(metadata: Metadata, raw: RawParameters) -> CommandResult {
    match ParameterSet::validate(raw) {
        Ok(parameters) => {
            let data = json!({ "valid": true, "parameters": parameters });
            CommandResult::ok(metadata, data)
        }
        Err(report) => {
            tracing::debug!(violations = report.len(), "parameters rejected");
            let errors = report.errors().iter().map(to_envelope_error).collect();
            let data = json!({ "valid": false, "violations": report.len() });
            CommandResult::ok(metadata, data).with_errors(errors, 2)
        }
    }
}

fn to_envelope_error(error: &ValidationError) -> EnvelopeError {
    EnvelopeError::new("parameters.invalid", error.to_string()).with_retryable(false)
}
