use coincast_core::RawParameters;
use coincast_ml::ForecasterRegistry;
use serde::Serialize;

use crate::error::CliError;
use crate::metadata::Metadata;

use super::{CommandOutput, CommandResult};

const SCHEMA_VERSION: &str = "coincast.models.v1";

#[derive(Debug, Serialize)]
struct ModelInfo {
    name: String,
    supports_intervals: bool,
    /// Whether the default parameters configure this model.
    configured_by_default: bool,
}

pub fn run() -> Result<CommandOutput, CliError> {
    let metadata = Metadata::start(SCHEMA_VERSION);
    let models = describe(&ForecasterRegistry::with_builtins(), &RawParameters::default());
    let data = serde_json::to_value(models)?;
    Ok(CommandOutput::Envelope(CommandResult::ok(metadata, data)))
}

fn describe(registry: &ForecasterRegistry, defaults: &RawParameters) -> Vec<ModelInfo> {
    registry
        .iter()
        .map(|(name, forecaster)| ModelInfo {
            name: name.to_owned(),
            supports_intervals: forecaster.supports_intervals(),
            configured_by_default: defaults.models.contains_key(name),
        })
        .collect()
}
