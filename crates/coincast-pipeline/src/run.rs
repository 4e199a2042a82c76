//! Run state and the outputs each stage publishes.
//!
//! A [`PipelineRun`] is a value: the orchestrator replaces it wholesale when
//! a stage starts or finishes, and readers hold cheap `Arc` snapshots that
//! never change underneath them.

use std::collections::BTreeMap;
use std::sync::Arc;

use coincast_core::{
    AssetId, FetchError, ParameterSet, ProviderId, StageName, TimeSeries, UtcDateTime,
};
use coincast_ml::{
    EvaluationReport, Forecast, PredictionInterval, PreprocessedSeries, TrainedModel,
    TrainingError,
};
use serde::Serialize;
use uuid::Uuid;

use crate::error::StageFailure;
use crate::stage::{Stage, StageStatus, WORK_ORDER};

/// Output of the collecting stage.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionOutput {
    pub provider: ProviderId,
    /// Daily-aligned series per asset that was fetched.
    pub series: BTreeMap<AssetId, TimeSeries>,
    /// Assets left out under a partial fetch policy.
    pub failures: BTreeMap<AssetId, FetchError>,
    pub attempts: BTreeMap<AssetId, u32>,
}

/// Output of the preprocessing stage.
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessingOutput {
    pub series: BTreeMap<AssetId, PreprocessedSeries>,
}

/// One trained (model, asset) pair and its forecast.
#[derive(Debug, Clone)]
pub struct TrainedUnit {
    pub model: TrainedModel,
    /// `validation + test` steps after the training split, in original units.
    pub forecast: Forecast,
    /// MAE over the validation steps against observed actuals.
    pub validation_mae: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingFailure {
    pub model: String,
    pub asset: AssetId,
    pub error: TrainingError,
}

/// Output of the training stage.
///
/// `models` only holds successful pairs; failed pairs are listed in
/// `failures` and excluded from evaluation.
#[derive(Debug, Clone, Default)]
pub struct TrainingOutput {
    pub models: BTreeMap<String, BTreeMap<AssetId, TrainedUnit>>,
    pub failures: Vec<TrainingFailure>,
}

impl TrainingOutput {
    pub fn unit(&self, model: &str, asset: &AssetId) -> Option<&TrainedUnit> {
        self.models.get(model).and_then(|by_asset| by_asset.get(asset))
    }

    pub fn trained_count(&self) -> usize {
        self.models.values().map(BTreeMap::len).sum()
    }
}

/// Forecast one day past the end of an asset's series, made by the model
/// that ranked best for that asset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NextStepPrediction {
    pub asset: AssetId,
    /// Last value of the target series, in original units.
    pub last_price: f64,
    pub model: String,
    pub next_prediction: f64,
    /// Relative change from `last_price`; absent when `last_price` is zero.
    pub change_pct: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<PredictionInterval>,
}

/// Output of the evaluating stage.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationOutput {
    pub report: EvaluationReport,
    /// One entry per asset with a best model, in asset order.
    pub predictions: Vec<NextStepPrediction>,
}

/// One pipeline run: its parameters, stage statuses and published outputs.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    id: Uuid,
    generation: u64,
    created_at: UtcDateTime,
    parameters: Arc<ParameterSet>,
    stage: Stage,
    statuses: BTreeMap<StageName, StageStatus>,
    collection: Option<Arc<CollectionOutput>>,
    preprocessing: Option<Arc<PreprocessingOutput>>,
    training: Option<Arc<TrainingOutput>>,
    evaluation: Option<Arc<EvaluationReport>>,
    predictions: Option<Arc<Vec<NextStepPrediction>>>,
    failure: Option<StageFailure>,
    warnings: Vec<String>,
}

impl PipelineRun {
    pub(crate) fn configured(parameters: Arc<ParameterSet>, generation: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            generation,
            created_at: UtcDateTime::now(),
            parameters,
            stage: Stage::Configured,
            statuses: WORK_ORDER
                .iter()
                .map(|stage| (*stage, StageStatus::Pending))
                .collect(),
            collection: None,
            preprocessing: None,
            training: None,
            evaluation: None,
            predictions: None,
            failure: None,
            warnings: Vec::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn created_at(&self) -> UtcDateTime {
        self.created_at
    }

    pub fn parameters(&self) -> &Arc<ParameterSet> {
        &self.parameters
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn status(&self, stage: StageName) -> StageStatus {
        self.statuses.get(&stage).copied().unwrap_or_default()
    }

    pub fn statuses(&self) -> &BTreeMap<StageName, StageStatus> {
        &self.statuses
    }

    pub fn collection(&self) -> Option<&Arc<CollectionOutput>> {
        self.collection.as_ref()
    }

    pub fn preprocessing(&self) -> Option<&Arc<PreprocessingOutput>> {
        self.preprocessing.as_ref()
    }

    pub fn training(&self) -> Option<&Arc<TrainingOutput>> {
        self.training.as_ref()
    }

    pub fn evaluation(&self) -> Option<&Arc<EvaluationReport>> {
        self.evaluation.as_ref()
    }

    pub fn predictions(&self) -> Option<&Arc<Vec<NextStepPrediction>>> {
        self.predictions.as_ref()
    }

    pub fn failure(&self) -> Option<&StageFailure> {
        self.failure.as_ref()
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    /// Latest working stage that completed.
    pub fn last_completed(&self) -> Option<StageName> {
        WORK_ORDER
            .iter()
            .rev()
            .find(|stage| self.status(**stage) == StageStatus::Completed)
            .copied()
    }

    pub(crate) fn begin(&mut self, stage: StageName) {
        self.stage = stage.into();
        self.statuses.insert(stage, StageStatus::Running);
    }

    pub(crate) fn fail(&mut self, failure: StageFailure) {
        self.statuses.insert(failure.stage, StageStatus::Failed);
        self.stage = Stage::Failed;
        self.failure = Some(failure);
    }

    pub(crate) fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub(crate) fn publish_collection(&mut self, output: CollectionOutput) {
        self.collection = Some(Arc::new(output));
        self.finish(StageName::Collecting);
    }

    pub(crate) fn publish_preprocessing(&mut self, output: PreprocessingOutput) {
        self.preprocessing = Some(Arc::new(output));
        self.finish(StageName::Preprocessing);
    }

    pub(crate) fn publish_training(&mut self, output: TrainingOutput) {
        self.training = Some(Arc::new(output));
        self.finish(StageName::Training);
    }

    pub(crate) fn publish_evaluation(&mut self, output: EvaluationOutput) {
        self.evaluation = Some(Arc::new(output.report));
        self.predictions = Some(Arc::new(output.predictions));
        self.finish(StageName::Evaluating);
        self.stage = Stage::Done;
    }

    fn finish(&mut self, stage: StageName) {
        self.statuses.insert(stage, StageStatus::Completed);
    }
}
