use coincast_core::Hyperparameters;

use super::require_points;
use crate::forecast::{
    Forecast, ForecastFuture, Forecaster, ModelMetadata, PredictionInterval, TrainedModel,
    TrainingContext, TrainingInput,
};
use crate::preprocess::mean_and_std;

/// 95% two-sided normal quantile.
const Z_95: f64 = 1.959_963_984_540_054;

/// Repeats the last training value.
#[derive(Debug, Clone, Copy, Default)]
pub struct NaiveForecaster;

struct NaiveState {
    last: f64,
    step_std: f64,
}

impl Forecaster for NaiveForecaster {
    fn name(&self) -> &str {
        "naive"
    }

    fn supports_intervals(&self) -> bool {
        true
    }

    fn train<'a>(
        &'a self,
        input: TrainingInput,
        _hyperparameters: &'a Hyperparameters,
        context: &'a TrainingContext,
    ) -> ForecastFuture<'a, TrainedModel> {
        Box::pin(async move {
            require_points(&input.train, 1)?;
            context.ensure_active()?;

            let steps: Vec<f64> = input.train.windows(2).map(|w| w[1] - w[0]).collect();
            let (_, step_std) = mean_and_std(&steps);
            let last = input.train[input.train.len() - 1];

            context.report(1, 1, "fitted");
            let metadata = ModelMetadata::new(context, input.train.len())
                .with_parameter("step_std", step_std);
            Ok(TrainedModel::new(metadata, NaiveState { last, step_std }))
        })
    }

    fn predict<'a>(
        &'a self,
        model: &'a TrainedModel,
        horizon: usize,
    ) -> ForecastFuture<'a, Forecast> {
        Box::pin(async move {
            let state = model.expect_state::<NaiveState>()?;
            let points = vec![state.last; horizon];
            let intervals = (1..=horizon)
                .map(|step| {
                    let width = Z_95 * state.step_std * (step as f64).sqrt();
                    PredictionInterval {
                        lower: state.last - width,
                        upper: state.last + width,
                    }
                })
                .collect();
            Ok(Forecast::points(points).with_intervals(intervals))
        })
    }
}
