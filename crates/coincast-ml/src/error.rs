use coincast_core::{AssetId, Variable};
use serde::Serialize;
use thiserror::Error;

/// Failure that makes an asset's preprocessed output meaningless.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PreprocessingError {
    #[error("asset `{asset}` has no observed value for `{variable}`")]
    NoObservedValues { asset: AssetId, variable: Variable },

    #[error("asset `{asset}` has {len} observation(s); at least {required} are needed to split")]
    SeriesTooShort {
        asset: AssetId,
        len: usize,
        required: usize,
    },

    #[error("asset `{asset}` is missing the forecast target `price`")]
    MissingTarget { asset: AssetId },
}

impl PreprocessingError {
    pub fn asset(&self) -> &AssetId {
        match self {
            Self::NoObservedValues { asset, .. }
            | Self::SeriesTooShort { asset, .. }
            | Self::MissingTarget { asset } => asset,
        }
    }

    pub const fn code(&self) -> &'static str {
        match self {
            Self::NoObservedValues { .. } => "preprocessing.no_observed_values",
            Self::SeriesTooShort { .. } => "preprocessing.series_too_short",
            Self::MissingTarget { .. } => "preprocessing.missing_target",
        }
    }
}

/// Failure of one forecaster on one asset. Never fatal to sibling models.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TrainingError {
    #[error("needs at least {required} training points, got {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("invalid hyperparameter `{name}`: {reason}")]
    InvalidHyperparameter { name: String, reason: String },

    #[error("training diverged: {reason}")]
    Diverged { reason: String },

    #[error("model state does not belong to `{model}`")]
    StateMismatch { model: String },

    #[error("training was cancelled")]
    Cancelled,

    #[error("{0}")]
    Failed(String),
}

impl TrainingError {
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InsufficientData { .. } => "training.insufficient_data",
            Self::InvalidHyperparameter { .. } => "training.invalid_hyperparameter",
            Self::Diverged { .. } => "training.diverged",
            Self::StateMismatch { .. } => "training.state_mismatch",
            Self::Cancelled => "training.cancelled",
            Self::Failed(_) => "training.failed",
        }
    }
}

/// Degraded evaluation for one (model, asset) pair.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvaluationError {
    #[error("MAPE undefined for `{model}` on `{asset}`: every observed actual is near zero")]
    MapeUndefined { model: String, asset: AssetId },

    #[error("no observed test points to evaluate `{model}` on `{asset}`")]
    NoComparablePoints { model: String, asset: AssetId },

    #[error("`{model}` on `{asset}` produced {predicted} prediction(s) for {actual} actual(s)")]
    LengthMismatch {
        model: String,
        asset: AssetId,
        predicted: usize,
        actual: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("forecaster `{name}` is already registered")]
    Duplicate { name: String },

    #[error("forecaster name must not be empty")]
    EmptyName,
}
