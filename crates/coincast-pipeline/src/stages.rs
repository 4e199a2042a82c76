//! The work behind each stage.
//!
//! Every function reads the outputs of earlier stages and returns a complete
//! output or a [`StageFailure`]; nothing is published until it returns.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use coincast_core::{
    AssetId, FetchBatchError, Hyperparameters, MarketDataFetcher, ParameterSet, ProgressEvent,
    ProgressSink, StageName,
};
use coincast_ml::{
    EvaluationEngine, EvaluationReport, ForecastRecord, Forecaster, ForecasterRegistry,
    PreprocessingEngine, TrainingContext, TrainingError, TrainingInput,
};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::StageFailure;
use crate::run::{
    CollectionOutput, NextStepPrediction, PreprocessingOutput, TrainedUnit, TrainingFailure,
    TrainingOutput,
};

/// Shared, read-only collaborators of every run.
#[derive(Debug, Clone)]
pub(crate) struct Environment {
    pub fetcher: MarketDataFetcher,
    pub registry: ForecasterRegistry,
    pub evaluation: EvaluationEngine,
}

fn join_units<I, S>(units: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let joined = units
        .into_iter()
        .map(|unit| unit.as_ref().to_owned())
        .collect::<Vec<_>>()
        .join(", ");
    if joined.is_empty() {
        String::from("none")
    } else {
        joined
    }
}

pub(crate) async fn collect(
    env: &Environment,
    params: &ParameterSet,
    cancel: &CancellationToken,
    progress: &ProgressSink,
) -> Result<CollectionOutput, StageFailure> {
    let outcome = env
        .fetcher
        .fetch(
            params.assets(),
            params.date_range(),
            params.variables(),
            cancel,
            progress,
        )
        .await;

    match outcome {
        Ok(outcome) => Ok(CollectionOutput {
            provider: env.fetcher.source_id(),
            series: outcome.series,
            failures: outcome.failures,
            attempts: outcome.attempts,
        }),
        Err(FetchBatchError::Asset(error)) => Err(StageFailure::new(
            StageName::Collecting,
            error.asset().as_str(),
            error.code(),
            error.to_string(),
        )),
        Err(FetchBatchError::NothingFetched { failures }) => {
            let message = failures
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            Err(StageFailure::new(
                StageName::Collecting,
                join_units(failures.iter().map(|failure| failure.asset().as_str())),
                "fetch.nothing_fetched",
                message,
            ))
        }
        Err(FetchBatchError::Cancelled) => Err(StageFailure::cancelled(
            StageName::Collecting,
            join_units(params.assets().iter().map(AssetId::as_str)),
        )),
    }
}

pub(crate) async fn preprocess(
    params: &ParameterSet,
    collection: &CollectionOutput,
    cancel: &CancellationToken,
    progress: &ProgressSink,
) -> Result<PreprocessingOutput, StageFailure> {
    let engine = PreprocessingEngine::from_parameters(params);
    let total = collection.series.len() as u64;
    let mut series = BTreeMap::new();

    for (index, (asset, raw)) in collection.series.iter().enumerate() {
        if cancel.is_cancelled() {
            return Err(StageFailure::cancelled(StageName::Preprocessing, asset.as_str()));
        }

        let processed = engine.process(raw).map_err(|error| {
            StageFailure::new(
                StageName::Preprocessing,
                error.asset().as_str(),
                error.code(),
                error.to_string(),
            )
        })?;

        let target = processed.target();
        tracing::info!(
            asset = %asset,
            points = processed.len(),
            filled = target.quality.filled(),
            outliers = target.quality.outliers_detected,
            "asset preprocessed"
        );
        progress.emit(
            ProgressEvent::new(
                StageName::Preprocessing,
                asset.as_str(),
                index as u64 + 1,
                total,
            )
            .with_detail(format!("{} points", processed.len())),
        );
        series.insert(asset.clone(), processed);
        tokio::task::yield_now().await;
    }

    Ok(PreprocessingOutput { series })
}

/// Everything one (model, asset) training task owns.
struct TrainingJob {
    forecaster: Arc<dyn Forecaster>,
    hyperparameters: Hyperparameters,
    input: TrainingInput,
    validation_actual: Vec<Option<f64>>,
    horizon: usize,
    context: TrainingContext,
}

impl TrainingJob {
    async fn run(self) -> Result<TrainedUnit, TrainingError> {
        let Self {
            forecaster,
            hyperparameters,
            input,
            validation_actual,
            horizon,
            context,
        } = self;
        let scaler = input.scaler;

        let work = async {
            let model = forecaster.train(input, &hyperparameters, &context).await?;
            let forecast = forecaster.predict(&model, horizon).await?;
            Ok::<_, TrainingError>((model, forecast))
        };
        let (model, forecast) = tokio::select! {
            _ = context.cancel.cancelled() => return Err(TrainingError::Cancelled),
            result = work => result?,
        };

        if forecast.len() != horizon {
            return Err(TrainingError::Failed(format!(
                "forecast has {} step(s), expected {horizon}",
                forecast.len()
            )));
        }
        if !forecast.points.iter().all(|point| point.is_finite()) {
            return Err(TrainingError::Diverged {
                reason: String::from("forecast contains non-finite values"),
            });
        }

        let forecast = forecast.denormalize(&scaler);
        let validation_mae = observed_mae(&forecast.points, &validation_actual);

        Ok(TrainedUnit {
            model,
            forecast,
            validation_mae,
        })
    }
}

fn observed_mae(predicted: &[f64], actual: &[Option<f64>]) -> Option<f64> {
    let errors: Vec<f64> = predicted
        .iter()
        .zip(actual)
        .filter_map(|(p, a)| a.map(|a| (p - a).abs()))
        .collect();
    (!errors.is_empty()).then(|| errors.iter().sum::<f64>() / errors.len() as f64)
}

pub(crate) async fn train(
    env: &Environment,
    params: &ParameterSet,
    preprocessing: &PreprocessingOutput,
    cancel: &CancellationToken,
    progress: &ProgressSink,
) -> Result<(TrainingOutput, Vec<String>), StageFailure> {
    let warnings: Vec<String> = params
        .configured_models()
        .filter(|name| !env.registry.contains(name))
        .map(|name| format!("hyperparameters given for unregistered model `{name}`"))
        .collect();
    for warning in &warnings {
        tracing::warn!("{warning}");
    }

    if env.registry.is_empty() {
        return Err(StageFailure::new(
            StageName::Training,
            "registry",
            "training.no_forecasters",
            "no forecaster is registered",
        ));
    }

    let mut tasks = JoinSet::new();
    let mut task_units = HashMap::new();

    for (name, forecaster) in env.registry.iter() {
        let hyperparameters = params.hyperparameters(name);
        for (asset, series) in &preprocessing.series {
            let split = series.split();
            let target = series.target();
            let job = TrainingJob {
                forecaster: Arc::clone(forecaster),
                hyperparameters: hyperparameters.clone(),
                input: TrainingInput {
                    train: target.normalized[split.train()].to_vec(),
                    validation: target.normalized[split.validation()].to_vec(),
                    scaler: target.scaler,
                },
                validation_actual: target.original[split.validation()].to_vec(),
                horizon: split.horizon(),
                context: TrainingContext::new(name, asset.clone())
                    .with_progress(progress.clone())
                    .with_cancellation(cancel.child_token()),
            };
            let handle = tasks.spawn(job.run());
            task_units.insert(handle.id(), (name.to_owned(), asset.clone()));
        }
    }
    let scheduled = task_units.len();
    tracing::info!(units = scheduled, "training started");

    let mut output = TrainingOutput::default();
    while let Some(joined) = tasks.join_next_with_id().await {
        let (id, result) = match joined {
            Ok((id, result)) => (id, result),
            Err(join_error) => (
                join_error.id(),
                Err(TrainingError::Failed(format!(
                    "training task failed: {join_error}"
                ))),
            ),
        };
        let Some((model, asset)) = task_units.remove(&id) else {
            continue;
        };

        match result {
            Ok(unit) => {
                tracing::info!(
                    model = %model,
                    asset = %asset,
                    validation_mae = unit.validation_mae,
                    "model trained"
                );
                output.models.entry(model).or_default().insert(asset, unit);
            }
            Err(error) => {
                tracing::warn!(model = %model, asset = %asset, error = %error, "training failed");
                output.failures.push(TrainingFailure {
                    model,
                    asset,
                    error,
                });
            }
        }
    }
    output
        .failures
        .sort_by(|a, b| (&a.model, &a.asset).cmp(&(&b.model, &b.asset)));

    if cancel.is_cancelled() {
        return Err(StageFailure::cancelled(
            StageName::Training,
            join_units(env.registry.names()),
        ));
    }
    if output.trained_count() == 0 {
        return Err(StageFailure::new(
            StageName::Training,
            join_units(
                output
                    .failures
                    .iter()
                    .map(|failure| format!("{}/{}", failure.model, failure.asset)),
            ),
            "training.nothing_trained",
            format!("all {scheduled} (model, asset) pair(s) failed"),
        ));
    }

    Ok((output, warnings))
}

pub(crate) fn evaluate(
    env: &Environment,
    preprocessing: &PreprocessingOutput,
    training: &TrainingOutput,
    progress: &ProgressSink,
) -> Result<EvaluationReport, StageFailure> {
    let mut records = Vec::new();
    for (model, by_asset) in &training.models {
        for (asset, unit) in by_asset {
            let Some(series) = preprocessing.series.get(asset) else {
                continue;
            };
            let split = series.split();
            let test = split.test();
            records.push(ForecastRecord {
                model: model.clone(),
                asset: asset.clone(),
                timestamps: series.timestamps()[test.clone()].to_vec(),
                actual: series.target().original[test].to_vec(),
                predicted: unit.forecast.points[split.validation_len()..].to_vec(),
            });
        }
    }

    let report = env.evaluation.evaluate(&records);
    progress.emit(
        ProgressEvent::new(
            StageName::Evaluating,
            "all",
            report.results.len() as u64,
            records.len() as u64,
        )
        .with_detail(format!("{} comparison(s)", report.comparisons.len())),
    );

    if report.results.is_empty() {
        return Err(StageFailure::new(
            StageName::Evaluating,
            join_units(
                records
                    .iter()
                    .map(|record| format!("{}/{}", record.model, record.asset)),
            ),
            "evaluation.no_results",
            "no (model, asset) pair had observed test actuals",
        ));
    }
    Ok(report)
}

/// Last prices with a smaller magnitude get no relative change.
const ZERO_PRICE: f64 = 1e-8;

/// Forecasts one step past the end of each asset's series with the model that
/// ranked best for it. The step after the series is step `horizon + 1` of the
/// model trained on the training split.
///
/// A pair whose next step cannot be produced is logged and left out; only
/// cancellation fails the stage.
pub(crate) async fn predict_next(
    env: &Environment,
    preprocessing: &PreprocessingOutput,
    training: &TrainingOutput,
    report: &EvaluationReport,
    cancel: &CancellationToken,
) -> Result<Vec<NextStepPrediction>, StageFailure> {
    let mut predictions = Vec::new();

    for (asset, model) in &report.ranking.best_per_asset {
        if cancel.is_cancelled() {
            return Err(StageFailure::cancelled(StageName::Evaluating, asset.as_str()));
        }
        let (Some(series), Some(unit), Some(forecaster)) = (
            preprocessing.series.get(asset),
            training.unit(model, asset),
            env.registry.get(model),
        ) else {
            continue;
        };
        let target = series.target();
        let Some(&last_price) = target.values.last() else {
            continue;
        };

        let steps = series.split().horizon() + 1;
        let forecast = match forecaster.predict(&unit.model, steps).await {
            Ok(forecast) if forecast.len() == steps => forecast.denormalize(&target.scaler),
            Ok(forecast) => {
                tracing::warn!(
                    model = %model,
                    asset = %asset,
                    steps = forecast.len(),
                    expected = steps,
                    "next-step forecast has the wrong length"
                );
                continue;
            }
            Err(error) => {
                tracing::warn!(model = %model, asset = %asset, error = %error, "next-step forecast failed");
                continue;
            }
        };
        let Some(next_prediction) = forecast.points.last().copied().filter(|p| p.is_finite())
        else {
            tracing::warn!(model = %model, asset = %asset, "next-step forecast is not finite");
            continue;
        };

        let change_pct = (last_price.abs() >= ZERO_PRICE)
            .then(|| (next_prediction - last_price) / last_price * 100.0);
        tracing::info!(
            model = %model,
            asset = %asset,
            last_price,
            next_prediction,
            "next step forecast"
        );
        predictions.push(NextStepPrediction {
            asset: asset.clone(),
            last_price,
            model: model.clone(),
            next_prediction,
            change_pct,
            interval: forecast
                .intervals
                .as_ref()
                .and_then(|intervals| intervals.last().copied()),
        });
    }

    Ok(predictions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observed_mae_skips_imputed_actuals() {
        let mae = observed_mae(&[1.0, 2.0, 3.0], &[Some(2.0), None, Some(3.0)]);
        assert_eq!(mae, Some(0.5));
        assert_eq!(observed_mae(&[1.0], &[None]), None);
    }

    #[test]
    fn join_units_names_every_unit() {
        assert_eq!(join_units(["bitcoin", "solana"]), "bitcoin, solana");
        assert_eq!(join_units(Vec::<String>::new()), "none");
    }
}
