use coincast_core::RawParameters;

use crate::error::CliError;

use super::CommandOutput;

pub fn run() -> Result<CommandOutput, CliError> {
    let defaults = serde_json::to_value(RawParameters::default())?;
    Ok(CommandOutput::Document(defaults))
}
