//! Logging setup.
//!
//! Logs go to stderr so stdout stays machine-readable. The filter comes from
//! `COINCAST_LOG`, then `RUST_LOG`, then `info`.

use clap::ValueEnum;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::CliError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Multi-line, human-readable.
    Pretty,
    /// One line per event.
    #[default]
    Compact,
    /// JSON objects for log aggregation.
    Json,
}

fn filter_directive() -> String {
    ["COINCAST_LOG", "RUST_LOG"]
        .iter()
        .find_map(|name| {
            std::env::var(name)
                .ok()
                .filter(|value| !value.trim().is_empty())
        })
        .unwrap_or_else(|| String::from("info"))
}

pub fn init(format: LogFormat) -> Result<(), CliError> {
    let filter = EnvFilter::try_new(filter_directive())
        .map_err(|error| CliError::Logging(error.to_string()))?;
    let registry = tracing_subscriber::registry().with(filter);

    let result = match format {
        LogFormat::Pretty => registry
            .with(fmt::layer().pretty().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            )
            .try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
    };
    result.map_err(|error| CliError::Logging(error.to_string()))
}
