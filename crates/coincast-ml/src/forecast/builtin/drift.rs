use coincast_core::Hyperparameters;

use super::require_points;
use crate::forecast::{
    Forecast, ForecastFuture, Forecaster, ModelMetadata, TrainedModel, TrainingContext,
    TrainingInput,
};

/// Random walk with drift: extends the straight line through the first and
/// last training values.
#[derive(Debug, Clone, Copy, Default)]
pub struct DriftForecaster;

struct DriftState {
    last: f64,
    slope: f64,
}

impl Forecaster for DriftForecaster {
    fn name(&self) -> &str {
        "drift"
    }

    fn train<'a>(
        &'a self,
        input: TrainingInput,
        _hyperparameters: &'a Hyperparameters,
        context: &'a TrainingContext,
    ) -> ForecastFuture<'a, TrainedModel> {
        Box::pin(async move {
            require_points(&input.train, 2)?;
            context.ensure_active()?;

            let n = input.train.len();
            let last = input.train[n - 1];
            let slope = (last - input.train[0]) / (n - 1) as f64;

            context.report(1, 1, "fitted");
            let metadata = ModelMetadata::new(context, n).with_parameter("slope", slope);
            Ok(TrainedModel::new(metadata, DriftState { last, slope }))
        })
    }

    fn predict<'a>(
        &'a self,
        model: &'a TrainedModel,
        horizon: usize,
    ) -> ForecastFuture<'a, Forecast> {
        Box::pin(async move {
            let state = model.expect_state::<DriftState>()?;
            let points = (1..=horizon)
                .map(|step| state.last + state.slope * step as f64)
                .collect();
            Ok(Forecast::points(points))
        })
    }
}

#[cfg(test)]
mod tests {
    use coincast_core::{AssetId, Normalization};

    use super::*;
    use crate::error::TrainingError;
    use crate::preprocess::FittedScaler;

    fn input(train: Vec<f64>) -> TrainingInput {
        TrainingInput {
            scaler: FittedScaler::fit(Normalization::Minmax, &train),
            train,
            validation: Vec::new(),
        }
    }

    #[tokio::test]
    async fn extends_linear_trend() {
        let context = TrainingContext::new("drift", AssetId::parse("ethereum").expect("valid"));
        let model = DriftForecaster
            .train(input(vec![0.0, 0.1, 0.2, 0.3]), &Hyperparameters::new(), &context)
            .await
            .expect("trains");

        let forecast = DriftForecaster.predict(&model, 2).await.expect("predicts");

        assert!((forecast.points[0] - 0.4).abs() < 1e-12);
        assert!((forecast.points[1] - 0.5).abs() < 1e-12);
    }

    #[tokio::test]
    async fn single_point_is_not_enough() {
        let context = TrainingContext::new("drift", AssetId::parse("ethereum").expect("valid"));
        let error = DriftForecaster
            .train(input(vec![0.5]), &Hyperparameters::new(), &context)
            .await
            .expect_err("needs two points");

        assert_eq!(
            error,
            TrainingError::InsufficientData {
                required: 2,
                available: 1
            }
        );
    }
}
