//! # Coincast ML
//!
//! Everything between fetched market data and a ranked model comparison.
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`preprocess`] | Gap filling, quality checks, chronological split, scaling |
//! | [`forecast`] | `Forecaster` contract, built-in models and the registry |
//! | [`evaluate`] | Metrics, significance tests and ranking |
//! | [`error`] | Preprocessing, training and evaluation errors |
//!
//! ```rust,ignore
//! let engine = PreprocessingEngine::from_parameters(&params);
//! let series = engine.process(&fetched)?;
//!
//! let registry = ForecasterRegistry::with_builtins();
//! let holt = registry.get("holt").expect("registered");
//! let model = holt.train(input, &hyperparameters, &context).await?;
//! let forecast = holt.predict(&model, series.split().horizon()).await?;
//! ```

pub mod error;
pub mod evaluate;
pub mod forecast;
pub mod preprocess;

pub use error::{EvaluationError, PreprocessingError, RegistryError, TrainingError};

pub use evaluate::{
    compute_metrics, wilcoxon_signed_rank, EvaluationEngine, EvaluationReport, EvaluationResult,
    ForecastRecord, Metrics, ModelAggregate, PairwiseComparison, Ranking, WilcoxonOutcome,
    DEFAULT_ALPHA, MAPE_EPSILON,
};

pub use forecast::{
    DriftForecaster, Forecast, ForecastFuture, Forecaster, ForecasterRegistry, HoltForecaster,
    LinearArForecaster, ModelMetadata, NaiveForecaster, PredictionInterval, TrainedModel,
    TrainingContext, TrainingInput,
};

pub use preprocess::{
    FittedScaler, PreprocessConfig, PreprocessedSeries, PreprocessingEngine, SplitIndices,
    ValueOrigin, VariableQuality, VariableSeries, MIN_SERIES_LEN,
};
