//! Built-in forecasters.
//!
//! Lightweight statistical models that satisfy the [`Forecaster`] contract
//! out of the box. Heavier models plug in through the same trait.
//!
//! | Name | Model |
//! |------|-------|
//! | `naive` | Last value, random-walk intervals |
//! | `drift` | Random walk with drift |
//! | `holt` | Double exponential smoothing (`alpha`, `beta`) |
//! | `linear_ar` | Autoregressive linear model fit by mini-batch SGD |
//!
//! [`Forecaster`]: crate::forecast::Forecaster

mod drift;
mod holt;
mod linear_ar;
mod naive;

pub use drift::DriftForecaster;
pub use holt::HoltForecaster;
pub use linear_ar::LinearArForecaster;
pub use naive::NaiveForecaster;

use coincast_core::Hyperparameters;

use crate::error::TrainingError;

fn require_points(train: &[f64], required: usize) -> Result<(), TrainingError> {
    if train.len() < required {
        return Err(TrainingError::InsufficientData {
            required,
            available: train.len(),
        });
    }
    Ok(())
}

/// Reads a numeric hyperparameter constrained to `(min, max]`.
fn bounded(
    hyperparameters: &Hyperparameters,
    name: &str,
    default: f64,
    min_exclusive: f64,
    max: f64,
) -> Result<f64, TrainingError> {
    let value = hyperparameters.number_or(name, default);
    if !value.is_finite() || value <= min_exclusive || value > max {
        return Err(TrainingError::InvalidHyperparameter {
            name: name.to_owned(),
            reason: format!("must be within ({min_exclusive}, {max}], got {value}"),
        });
    }
    Ok(value)
}
