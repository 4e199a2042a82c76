//! Structured, serializable view of a run for reporting collaborators.
//!
//! Everything is keyed by stage name and then by asset or model, so a
//! consumer can address e.g. `preprocessing.bitcoin.quality.price`.

use std::collections::BTreeMap;

use coincast_core::{AssetId, FetchError, ProviderId, StageName, Variable};
use coincast_ml::{
    EvaluationReport, FittedScaler, ModelMetadata, PredictionInterval, SplitIndices,
    VariableQuality,
};
use serde::Serialize;
use uuid::Uuid;

use crate::error::StageFailure;
use crate::run::{NextStepPrediction, PipelineRun, TrainingFailure};
use crate::stage::{Stage, StageStatus};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetCollection {
    pub observations: usize,
    /// Observed (non-absent) values per variable.
    pub present: BTreeMap<Variable, usize>,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionSummary {
    pub provider: ProviderId,
    pub assets: BTreeMap<AssetId, AssetCollection>,
    pub failures: BTreeMap<AssetId, FetchError>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssetPreprocessing {
    pub points: usize,
    pub split: SplitSummary,
    pub scalers: BTreeMap<Variable, FittedScaler>,
    pub quality: BTreeMap<Variable, VariableQuality>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SplitSummary {
    pub train: usize,
    pub validation: usize,
    pub test: usize,
}

impl From<SplitIndices> for SplitSummary {
    fn from(split: SplitIndices) -> Self {
        Self {
            train: split.train_len(),
            validation: split.validation_len(),
            test: split.test_len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainedSummary {
    pub metadata: ModelMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_mae: Option<f64>,
    /// Forecast in original units, validation steps first.
    pub forecast: Vec<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intervals: Option<Vec<PredictionInterval>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrainingSummary {
    pub models: BTreeMap<String, BTreeMap<AssetId, TrainedSummary>>,
    pub failures: Vec<TrainingFailure>,
}

/// Snapshot of a run as plain data.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub generation: u64,
    pub created_at: String,
    pub stage: Stage,
    pub statuses: BTreeMap<StageName, StageStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<StageFailure>,
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collecting: Option<CollectionSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preprocessing: Option<BTreeMap<AssetId, AssetPreprocessing>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub training: Option<TrainingSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evaluating: Option<EvaluationReport>,
    /// Next-step forecasts by each asset's best model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predictions: Option<Vec<NextStepPrediction>>,
}

impl RunReport {
    pub fn from_run(run: &PipelineRun) -> Self {
        let collecting = run.collection().map(|collection| CollectionSummary {
            provider: collection.provider,
            assets: collection
                .series
                .iter()
                .map(|(asset, series)| {
                    let present = run
                        .parameters()
                        .variables()
                        .iter()
                        .map(|variable| (*variable, series.present_count(*variable)))
                        .collect();
                    let summary = AssetCollection {
                        observations: series.len(),
                        present,
                        attempts: collection.attempts.get(asset).copied().unwrap_or(0),
                    };
                    (asset.clone(), summary)
                })
                .collect(),
            failures: collection.failures.clone(),
        });

        let preprocessing = run.preprocessing().map(|output| {
            output
                .series
                .iter()
                .map(|(asset, series)| {
                    let summary = AssetPreprocessing {
                        points: series.len(),
                        split: series.split().into(),
                        scalers: series
                            .variables()
                            .iter()
                            .map(|v| (v.variable, v.scaler))
                            .collect(),
                        quality: series.quality(),
                    };
                    (asset.clone(), summary)
                })
                .collect()
        });

        let training = run.training().map(|output| TrainingSummary {
            models: output
                .models
                .iter()
                .map(|(model, by_asset)| {
                    let units = by_asset
                        .iter()
                        .map(|(asset, unit)| {
                            let summary = TrainedSummary {
                                metadata: unit.model.metadata().clone(),
                                validation_mae: unit.validation_mae,
                                forecast: unit.forecast.points.clone(),
                                intervals: unit.forecast.intervals.clone(),
                            };
                            (asset.clone(), summary)
                        })
                        .collect();
                    (model.clone(), units)
                })
                .collect(),
            failures: output.failures.clone(),
        });

        Self {
            run_id: run.id(),
            generation: run.generation(),
            created_at: run.created_at().format_rfc3339(),
            stage: run.stage(),
            statuses: run.statuses().clone(),
            failure: run.failure().cloned(),
            warnings: run.warnings().to_vec(),
            collecting,
            preprocessing,
            training,
            evaluating: run.evaluation().map(|report| (**report).clone()),
            predictions: run.predictions().map(|predictions| (**predictions).clone()),
        }
    }

    /// Model that won overall, once evaluation has run.
    pub fn winner(&self) -> Option<&str> {
        self.evaluating
            .as_ref()
            .and_then(|report| report.ranking.winner())
    }

    pub fn prediction(&self, asset: &AssetId) -> Option<&NextStepPrediction> {
        self.predictions
            .as_ref()
            .and_then(|predictions| predictions.iter().find(|p| &p.asset == asset))
    }
}
