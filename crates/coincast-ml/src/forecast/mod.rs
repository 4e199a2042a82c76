//! Forecaster contract, trained-model artifacts and the registry.
//!
//! Forecasters see only normalized data. Predictions start at the first
//! point after the training split and are denormalized by the caller with
//! the same [`FittedScaler`] that was handed to `train`.

mod builtin;
mod registry;

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use coincast_core::{AssetId, Hyperparameters, ProgressEvent, ProgressSink, StageName};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::error::TrainingError;
use crate::preprocess::FittedScaler;

pub use builtin::{DriftForecaster, HoltForecaster, LinearArForecaster, NaiveForecaster};
pub use registry::ForecasterRegistry;

/// Boxed future returned by forecasters.
pub type ForecastFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TrainingError>> + Send + 'a>>;

/// Normalized target data for one asset.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingInput {
    pub train: Vec<f64>,
    /// Held out; may be used for monitoring, never for fitting.
    pub validation: Vec<f64>,
    /// Fitted on `train`; maps original units to the normalized space.
    pub scaler: FittedScaler,
}

/// Where a training job runs and how it reports.
#[derive(Debug, Clone)]
pub struct TrainingContext {
    pub model: String,
    pub asset: AssetId,
    pub progress: ProgressSink,
    pub cancel: CancellationToken,
}

impl TrainingContext {
    pub fn new(model: impl Into<String>, asset: AssetId) -> Self {
        Self {
            model: model.into(),
            asset,
            progress: ProgressSink::disabled(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// `model/asset`, the unit name used in progress events and failures.
    pub fn unit(&self) -> String {
        format!("{}/{}", self.model, self.asset)
    }

    pub fn report(&self, completed: u64, total: u64, detail: impl Into<String>) {
        self.progress.emit(
            ProgressEvent::new(StageName::Training, self.unit(), completed, total)
                .with_detail(detail),
        );
    }

    pub fn ensure_active(&self) -> Result<(), TrainingError> {
        if self.cancel.is_cancelled() {
            Err(TrainingError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Descriptive metadata of a trained model, safe to hand to reporters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelMetadata {
    pub model: String,
    pub asset: AssetId,
    pub trained_on: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub epochs: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_loss: Option<f64>,
    pub parameters: BTreeMap<String, f64>,
}

impl ModelMetadata {
    pub fn new(context: &TrainingContext, trained_on: usize) -> Self {
        Self {
            model: context.model.clone(),
            asset: context.asset.clone(),
            trained_on,
            epochs: None,
            final_loss: None,
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: f64) -> Self {
        self.parameters.insert(name.into(), value);
        self
    }

    pub fn with_epochs(mut self, epochs: usize, final_loss: f64) -> Self {
        self.epochs = Some(epochs);
        self.final_loss = Some(final_loss);
        self
    }
}

/// Opaque artifact of one (model, asset) training run.
///
/// Immutable once created; clones share the same state.
#[derive(Clone)]
pub struct TrainedModel {
    metadata: ModelMetadata,
    state: Arc<dyn Any + Send + Sync>,
}

impl TrainedModel {
    pub fn new<S: Any + Send + Sync>(metadata: ModelMetadata, state: S) -> Self {
        Self {
            metadata,
            state: Arc::new(state),
        }
    }

    pub fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    pub fn model(&self) -> &str {
        &self.metadata.model
    }

    pub fn asset(&self) -> &AssetId {
        &self.metadata.asset
    }

    /// Borrows the forecaster-specific state if it has type `S`.
    pub fn state<S: Any>(&self) -> Option<&S> {
        self.state.downcast_ref::<S>()
    }

    /// Like [`TrainedModel::state`] but reports a mismatch as a training error.
    pub fn expect_state<S: Any>(&self) -> Result<&S, TrainingError> {
        self.state::<S>().ok_or_else(|| TrainingError::StateMismatch {
            model: self.metadata.model.clone(),
        })
    }
}

impl Debug for TrainedModel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrainedModel")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// Two-sided prediction interval for one step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PredictionInterval {
    pub lower: f64,
    pub upper: f64,
}

/// Point forecasts for `horizon` consecutive steps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Forecast {
    pub points: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intervals: Option<Vec<PredictionInterval>>,
}

impl Forecast {
    pub fn points(points: Vec<f64>) -> Self {
        Self {
            points,
            intervals: None,
        }
    }

    pub fn with_intervals(mut self, intervals: Vec<PredictionInterval>) -> Self {
        self.intervals = Some(intervals);
        self
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Maps points and intervals back to original units.
    pub fn denormalize(&self, scaler: &FittedScaler) -> Self {
        Self {
            points: scaler.inverse_all(&self.points),
            intervals: self.intervals.as_ref().map(|intervals| {
                intervals
                    .iter()
                    .map(|interval| PredictionInterval {
                        lower: scaler.inverse(interval.lower),
                        upper: scaler.inverse(interval.upper),
                    })
                    .collect()
            }),
        }
    }
}

/// A swappable forecasting model.
///
/// Implementations must be `Send + Sync`; one instance trains many assets
/// concurrently, so per-run state lives in the returned [`TrainedModel`].
pub trait Forecaster: Send + Sync {
    fn name(&self) -> &str;

    fn supports_intervals(&self) -> bool {
        false
    }

    fn train<'a>(
        &'a self,
        input: TrainingInput,
        hyperparameters: &'a Hyperparameters,
        context: &'a TrainingContext,
    ) -> ForecastFuture<'a, TrainedModel>;

    /// Forecasts `horizon` steps after the end of the training data.
    fn predict<'a>(&'a self, model: &'a TrainedModel, horizon: usize)
        -> ForecastFuture<'a, Forecast>;
}
