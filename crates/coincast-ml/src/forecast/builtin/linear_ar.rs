use coincast_core::Hyperparameters;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use super::{bounded, require_points};
use crate::error::TrainingError;
use crate::forecast::{
    Forecast, ForecastFuture, Forecaster, ModelMetadata, TrainedModel, TrainingContext,
    TrainingInput,
};

const DEFAULT_CONTEXT_LENGTH: usize = 30;
const DEFAULT_EPOCHS: usize = 10;
const DEFAULT_BATCH_SIZE: usize = 64;
const DEFAULT_LEARNING_RATE: f64 = 0.001;
const DEFAULT_SEED: u64 = 42;

/// Autoregressive linear model over the last `context_length` values,
/// fit by mini-batch stochastic gradient descent on squared error.
///
/// Weights start as a persistence model (all weight on the latest lag), so
/// few epochs never do worse than chance. Reports one progress event per
/// epoch and observes cancellation between epochs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearArForecaster;

#[derive(Debug, Clone, PartialEq)]
struct ArSettings {
    context_length: usize,
    epochs: usize,
    batch_size: usize,
    learning_rate: f64,
    seed: u64,
}

impl ArSettings {
    fn from_hyperparameters(hyperparameters: &Hyperparameters) -> Result<Self, TrainingError> {
        let positive = |name: &str, default: usize| {
            let value = hyperparameters.count_or(name, default);
            if value == 0 {
                Err(TrainingError::InvalidHyperparameter {
                    name: name.to_owned(),
                    reason: String::from("must be at least 1"),
                })
            } else {
                Ok(value)
            }
        };

        Ok(Self {
            context_length: positive("context_length", DEFAULT_CONTEXT_LENGTH)?,
            epochs: positive("epochs", DEFAULT_EPOCHS)?,
            batch_size: positive("batch_size", DEFAULT_BATCH_SIZE)?,
            learning_rate: bounded(
                hyperparameters,
                "learning_rate",
                DEFAULT_LEARNING_RATE,
                0.0,
                1.0,
            )?,
            seed: hyperparameters
                .number("seed")
                .filter(|seed| seed.is_finite() && *seed >= 0.0)
                .map(|seed| seed as u64)
                .unwrap_or(DEFAULT_SEED),
        })
    }
}

struct ArState {
    weights: Vec<f64>,
    bias: f64,
    /// Last `context_length` training values, oldest first.
    tail: Vec<f64>,
}

impl ArState {
    fn predict_one(&self, window: &[f64]) -> f64 {
        self.bias
            + self
                .weights
                .iter()
                .zip(window)
                .map(|(w, x)| w * x)
                .sum::<f64>()
    }
}

impl Forecaster for LinearArForecaster {
    fn name(&self) -> &str {
        "linear_ar"
    }

    fn train<'a>(
        &'a self,
        input: TrainingInput,
        hyperparameters: &'a Hyperparameters,
        context: &'a TrainingContext,
    ) -> ForecastFuture<'a, TrainedModel> {
        Box::pin(async move {
            let settings = ArSettings::from_hyperparameters(hyperparameters)?;
            let p = settings.context_length;
            require_points(&input.train, p + 1)?;

            let train = &input.train;
            let targets: Vec<usize> = (p..train.len()).collect();
            let mut state = ArState {
                weights: vec![0.0; p],
                bias: 0.0,
                tail: train[train.len() - p..].to_vec(),
            };
            state.weights[p - 1] = 1.0;

            let mut rng = StdRng::seed_from_u64(settings.seed);
            let mut order = targets.clone();
            let mut loss = mean_squared_error(&state, train, &targets);

            for epoch in 1..=settings.epochs {
                context.ensure_active()?;
                order.shuffle(&mut rng);

                for batch in order.chunks(settings.batch_size) {
                    let mut grad_w = vec![0.0; p];
                    let mut grad_b = 0.0;
                    for &t in batch {
                        let window = &train[t - p..t];
                        let error = state.predict_one(window) - train[t];
                        for (g, x) in grad_w.iter_mut().zip(window) {
                            *g += error * x;
                        }
                        grad_b += error;
                    }
                    let step = 2.0 * settings.learning_rate / batch.len() as f64;
                    for (w, g) in state.weights.iter_mut().zip(&grad_w) {
                        *w -= step * g;
                    }
                    state.bias -= step * grad_b;
                }

                loss = mean_squared_error(&state, train, &targets);
                if !loss.is_finite() {
                    return Err(TrainingError::Diverged {
                        reason: format!("loss became {loss} at epoch {epoch}"),
                    });
                }

                tracing::debug!(unit = %context.unit(), epoch, epochs = settings.epochs, loss, "epoch finished");
                context.report(
                    epoch as u64,
                    settings.epochs as u64,
                    format!("epoch {epoch}/{} loss={loss:.6}", settings.epochs),
                );
                tokio::task::yield_now().await;
            }
            context.ensure_active()?;

            let metadata = ModelMetadata::new(context, train.len())
                .with_epochs(settings.epochs, loss)
                .with_parameter("context_length", p as f64)
                .with_parameter("batch_size", settings.batch_size as f64)
                .with_parameter("learning_rate", settings.learning_rate)
                .with_parameter("bias", state.bias);
            Ok(TrainedModel::new(metadata, state))
        })
    }

    fn predict<'a>(
        &'a self,
        model: &'a TrainedModel,
        horizon: usize,
    ) -> ForecastFuture<'a, Forecast> {
        Box::pin(async move {
            let state = model.expect_state::<ArState>()?;
            let p = state.tail.len();
            let mut history = state.tail.clone();
            let mut points = Vec::with_capacity(horizon);

            for _ in 0..horizon {
                let next = state.predict_one(&history[history.len() - p..]);
                points.push(next);
                history.push(next);
            }
            Ok(Forecast::points(points))
        })
    }
}

fn mean_squared_error(state: &ArState, train: &[f64], targets: &[usize]) -> f64 {
    let p = state.weights.len();
    let total: f64 = targets
        .iter()
        .map(|&t| (state.predict_one(&train[t - p..t]) - train[t]).powi(2))
        .sum();
    total / targets.len().max(1) as f64
}
