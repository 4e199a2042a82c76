use coincast_core::StageName;
use serde::Serialize;
use thiserror::Error;

use crate::stage::Stage;

/// Why a working stage failed, naming the stage and the unit of work.
///
/// `unit` is an asset id, a `model/asset` pair, or a comma-separated list
/// when every unit of the stage failed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{stage} failed for {unit}: {message}")]
pub struct StageFailure {
    pub stage: StageName,
    pub unit: String,
    /// Stable machine-readable code, e.g. `source.unknown_asset`.
    pub code: String,
    pub message: String,
}

impl StageFailure {
    pub fn new(
        stage: StageName,
        unit: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            unit: unit.into(),
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn cancelled(stage: StageName, unit: impl Into<String>) -> Self {
        Self::new(stage, unit, "pipeline.cancelled", "cancelled before completion")
    }

    pub fn is_cancelled(&self) -> bool {
        self.code == "pipeline.cancelled"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error(transparent)]
    StageFailed(StageFailure),

    #[error("pipeline is in `failed` after {stage}; reset to start over")]
    AlreadyFailed { stage: StageName },

    #[error("pipeline is already done")]
    AlreadyDone,

    #[error("stage `{stage}` is still running")]
    Busy { stage: Stage },

    #[error("run was reset while `{stage}` was in flight; its output was discarded")]
    Superseded { stage: StageName },
}

impl PipelineError {
    pub fn failure(&self) -> Option<&StageFailure> {
        match self {
            Self::StageFailed(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn code(&self) -> &str {
        match self {
            Self::StageFailed(failure) => &failure.code,
            Self::AlreadyFailed { .. } => "pipeline.already_failed",
            Self::AlreadyDone => "pipeline.already_done",
            Self::Busy { .. } => "pipeline.busy",
            Self::Superseded { .. } => "pipeline.superseded",
        }
    }
}
