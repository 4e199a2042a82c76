use coincast_core::CoreError;
use coincast_pipeline::PipelineError;
use thiserror::Error;

use crate::output::stream_writer::StreamError;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Parameters(#[from] CoreError),

    #[error("cannot read parameters from {path}: {source}")]
    Config {
        path: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("pipeline task stopped unexpectedly: {0}")]
    Task(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("cannot initialise logging: {0}")]
    Logging(String),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Parameters(_) => 2,
            Self::Config { .. } => 2,
            Self::Pipeline(_) => 3,
            Self::Task(_) => 3,
            Self::Serialization(_) => 4,
            Self::Io(_) => 10,
            Self::Logging(_) => 10,
        }
    }
}

impl From<StreamError> for CliError {
    fn from(error: StreamError) -> Self {
        match error {
            StreamError::Serialization(error) => Self::Serialization(error),
            StreamError::Io(error) => Self::Io(error),
        }
    }
}
