use coincast_core::Hyperparameters;

use super::{bounded, require_points};
use crate::forecast::{
    Forecast, ForecastFuture, Forecaster, ModelMetadata, TrainedModel, TrainingContext,
    TrainingInput,
};

/// Holt's linear trend method (double exponential smoothing).
///
/// Hyperparameters: `alpha` (level, default 0.5) and `beta` (trend,
/// default 0.1), both in `(0, 1]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HoltForecaster;

struct HoltState {
    level: f64,
    trend: f64,
}

impl Forecaster for HoltForecaster {
    fn name(&self) -> &str {
        "holt"
    }

    fn train<'a>(
        &'a self,
        input: TrainingInput,
        hyperparameters: &'a Hyperparameters,
        context: &'a TrainingContext,
    ) -> ForecastFuture<'a, TrainedModel> {
        Box::pin(async move {
            let alpha = bounded(hyperparameters, "alpha", 0.5, 0.0, 1.0)?;
            let beta = bounded(hyperparameters, "beta", 0.1, 0.0, 1.0)?;
            require_points(&input.train, 2)?;
            context.ensure_active()?;

            let train = &input.train;
            let mut level = train[0];
            let mut trend = train[1] - train[0];
            let mut sse = 0.0;
            for &value in &train[1..] {
                let forecast = level + trend;
                sse += (value - forecast).powi(2);
                let previous_level = level;
                level = alpha * value + (1.0 - alpha) * forecast;
                trend = beta * (level - previous_level) + (1.0 - beta) * trend;
            }
            let mse = sse / (train.len() - 1) as f64;

            context.report(1, 1, format!("fitted mse={mse:.6}"));
            let metadata = ModelMetadata::new(context, train.len())
                .with_parameter("alpha", alpha)
                .with_parameter("beta", beta)
                .with_parameter("one_step_mse", mse);
            Ok(TrainedModel::new(metadata, HoltState { level, trend }))
        })
    }

    fn predict<'a>(
        &'a self,
        model: &'a TrainedModel,
        horizon: usize,
    ) -> ForecastFuture<'a, Forecast> {
        Box::pin(async move {
            let state = model.expect_state::<HoltState>()?;
            let points = (1..=horizon)
                .map(|step| state.level + state.trend * step as f64)
                .collect();
            Ok(Forecast::points(points))
        })
    }
}
