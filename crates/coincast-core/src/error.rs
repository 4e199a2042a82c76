use std::fmt::{Display, Formatter};

use thiserror::Error;

/// Validation and contract errors exposed by `coincast-core`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("at least one asset must be selected")]
    EmptyAssets,
    #[error("asset id cannot be empty")]
    EmptyAssetId,
    #[error("asset id length {len} exceeds max {max}")]
    AssetIdTooLong { len: usize, max: usize },
    #[error("asset id must start with an ASCII letter or digit: '{ch}'")]
    AssetIdInvalidStart { ch: char },
    #[error("asset id contains invalid character '{ch}' at index {index}")]
    AssetIdInvalidChar { ch: char, index: usize },

    #[error("invalid variable '{value}', expected one of price, volume, market_cap")]
    InvalidVariable { value: String },
    #[error("at least one variable must be selected")]
    EmptyVariables,
    #[error("variable 'price' must be selected; it is the forecast target")]
    MissingTargetVariable,

    #[error("{field} must be a calendar date formatted YYYY-MM-DD: '{value}'")]
    InvalidDate { field: &'static str, value: String },
    #[error("date range start {start} must be before end {end}")]
    InvertedDateRange { start: String, end: String },
    #[error("timestamp must be RFC3339 UTC (suffix Z): '{value}'")]
    TimestampNotUtc { value: String },

    #[error("{name} split must be strictly between 0 and 1, got {value}")]
    SplitOutOfRange { name: &'static str, value: f64 },
    #[error("train/validation/test splits must sum to 1.0 (±{tolerance}), got {sum}")]
    SplitSum { sum: f64, tolerance: f64 },

    #[error("model '{model}': hyperparameter '{name}' = {value} is outside [{min}, {max}]")]
    HyperparameterOutOfRange {
        model: String,
        name: String,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("model '{model}': hyperparameter '{name}' must be an integer, got {value}")]
    HyperparameterNotInteger {
        model: String,
        name: String,
        value: f64,
    },
    #[error("model '{model}': hyperparameter '{name}' must be a finite number")]
    HyperparameterNotFinite { model: String, name: String },
    #[error("model '{model}': hyperparameter '{name}' must be numeric")]
    HyperparameterNotNumeric { model: String, name: String },
    #[error("model name cannot be empty")]
    EmptyModelName,

    #[error("quality setting '{field}' {reason}")]
    InvalidQualitySetting { field: &'static str, reason: String },

    #[error("field '{field}' must be finite")]
    NonFiniteValue { field: &'static str },
    #[error("field '{field}' must be non-negative")]
    NegativeValue { field: &'static str },
    #[error("observation timestamps must be strictly increasing (index {index})")]
    UnorderedObservations { index: usize },
}

/// Full list of violations found while validating a parameter set.
///
/// Validation never stops at the first problem, so callers can display every
/// issue at once.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    errors: Vec<ValidationError>,
}

impl ValidationReport {
    pub fn new(errors: Vec<ValidationError>) -> Self {
        Self { errors }
    }

    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    pub fn into_errors(self) -> Vec<ValidationError> {
        self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn contains(&self, predicate: impl Fn(&ValidationError) -> bool) -> bool {
        self.errors.iter().any(predicate)
    }
}

impl Display for ValidationReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} validation error(s)", self.errors.len())?;
        for error in &self.errors {
            write!(f, "; {error}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationReport {}

/// Top-level error type for core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    InvalidParameters(#[from] ValidationReport),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
