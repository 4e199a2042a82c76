//! # Preprocessing Engine
//!
//! Turns a daily-aligned [`TimeSeries`] into a read-only
//! [`PreprocessedSeries`]:
//!
//! 1. locate gaps per selected variable
//! 2. fill interior gaps with the chosen interpolation, edge gaps with the
//!    nearest known value (flagged as extrapolated)
//! 3. split chronologically into train/validation/test
//! 4. detect outliers against training statistics, clipping if configured
//! 5. fit the scaler on the training split and apply it unchanged to the
//!    whole series
//!
//! Processing is a pure function of its input: identical series give
//! bit-identical output.

mod interpolate;
mod scaler;
mod split;

use std::collections::BTreeMap;

use coincast_core::{
    AssetId, Interpolation, Normalization, OutlierAction, OutlierRule, ParameterSet,
    QualitySettings, SplitFractions, TimeSeries, UtcDateTime, Variable,
};
use serde::Serialize;

use crate::error::PreprocessingError;

pub use interpolate::{fill, find_gaps, Gap, ValueOrigin};
pub use scaler::FittedScaler;
pub use split::{SplitIndices, MIN_SERIES_LEN};

pub(crate) use scaler::{mean_and_std, quartiles};

/// Settings the engine needs, lifted out of a [`ParameterSet`].
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessConfig {
    pub variables: Vec<Variable>,
    pub interpolation: Interpolation,
    pub normalization: Normalization,
    pub split: SplitFractions,
    pub quality: QualitySettings,
}

impl PreprocessConfig {
    pub fn from_parameters(params: &ParameterSet) -> Self {
        Self {
            variables: params.variables().to_vec(),
            interpolation: params.interpolation(),
            normalization: params.normalization(),
            split: params.split(),
            quality: *params.quality(),
        }
    }
}

/// Per-variable data quality summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableQuality {
    pub observed: usize,
    pub interpolated: usize,
    pub extrapolated: usize,
    pub missing_fraction: f64,
    /// Missing fraction exceeds the configured threshold.
    pub exceeds_missing_threshold: bool,
    pub longest_gap: usize,
    /// Gaps longer than the configured maximum gap length.
    pub long_gaps: usize,
    pub outliers_detected: usize,
    pub outliers_clipped: usize,
    pub outlier_action: OutlierAction,
}

impl VariableQuality {
    pub fn filled(&self) -> usize {
        self.interpolated + self.extrapolated
    }
}

/// One preprocessed variable of one asset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariableSeries {
    pub variable: Variable,
    /// Values as fetched; `None` where the upstream had no data.
    pub original: Vec<Option<f64>>,
    /// Filled (and, if configured, clipped) values in original units.
    pub values: Vec<f64>,
    pub normalized: Vec<f64>,
    pub origin: Vec<ValueOrigin>,
    pub scaler: FittedScaler,
    pub quality: VariableQuality,
}

impl VariableSeries {
    pub fn denormalize(&self, normalized: &[f64]) -> Vec<f64> {
        self.scaler.inverse_all(normalized)
    }
}

/// Read-only output of the engine for one asset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreprocessedSeries {
    asset: AssetId,
    timestamps: Vec<UtcDateTime>,
    split: SplitIndices,
    variables: Vec<VariableSeries>,
    target: usize,
}

impl PreprocessedSeries {
    pub fn asset(&self) -> &AssetId {
        &self.asset
    }

    pub fn timestamps(&self) -> &[UtcDateTime] {
        &self.timestamps
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn split(&self) -> SplitIndices {
        self.split
    }

    pub fn variables(&self) -> &[VariableSeries] {
        &self.variables
    }

    pub fn variable(&self, variable: Variable) -> Option<&VariableSeries> {
        self.variables.iter().find(|v| v.variable == variable)
    }

    /// The forecast target (price).
    pub fn target(&self) -> &VariableSeries {
        &self.variables[self.target]
    }

    pub fn quality(&self) -> BTreeMap<Variable, VariableQuality> {
        self.variables
            .iter()
            .map(|v| (v.variable, v.quality.clone()))
            .collect()
    }
}

/// Stateless preprocessing engine.
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessingEngine {
    config: PreprocessConfig,
}

impl PreprocessingEngine {
    pub fn new(config: PreprocessConfig) -> Self {
        Self { config }
    }

    pub fn from_parameters(params: &ParameterSet) -> Self {
        Self::new(PreprocessConfig::from_parameters(params))
    }

    pub fn config(&self) -> &PreprocessConfig {
        &self.config
    }

    pub fn process(&self, series: &TimeSeries) -> Result<PreprocessedSeries, PreprocessingError> {
        let asset = series.asset().clone();
        let mut selected = self.config.variables.clone();
        selected.sort();
        selected.dedup();
        if !selected.contains(&Variable::Price) {
            return Err(PreprocessingError::MissingTarget { asset });
        }

        let split = SplitIndices::compute(series.len(), self.config.split).ok_or_else(|| {
            PreprocessingError::SeriesTooShort {
                asset: asset.clone(),
                len: series.len(),
                required: MIN_SERIES_LEN,
            }
        })?;

        let mut variables = Vec::with_capacity(selected.len());
        for variable in selected {
            variables.push(self.process_variable(&asset, series, variable, split)?);
        }
        let target = variables
            .iter()
            .position(|v| v.variable == Variable::Price)
            .ok_or_else(|| PreprocessingError::MissingTarget {
                asset: asset.clone(),
            })?;

        tracing::debug!(asset = %asset, len = series.len(), train = split.train_len(), "series preprocessed");

        Ok(PreprocessedSeries {
            asset,
            timestamps: series.timestamps(),
            split,
            variables,
            target,
        })
    }

    fn process_variable(
        &self,
        asset: &AssetId,
        series: &TimeSeries,
        variable: Variable,
        split: SplitIndices,
    ) -> Result<VariableSeries, PreprocessingError> {
        let quality_settings = &self.config.quality;
        let original = series.values(variable);
        let gaps = find_gaps(&original);

        let (mut values, origin) = fill(&original, self.config.interpolation).ok_or_else(|| {
            PreprocessingError::NoObservedValues {
                asset: asset.clone(),
                variable,
            }
        })?;

        let bounds = outlier_bounds(&values[split.train()], quality_settings.outlier_rule);
        let mut outliers_detected = 0;
        let mut outliers_clipped = 0;
        if let Some((lower, upper)) = bounds {
            for value in &mut values {
                if *value < lower || *value > upper {
                    outliers_detected += 1;
                    if quality_settings.outlier_action == OutlierAction::Clip {
                        *value = value.clamp(lower, upper);
                        outliers_clipped += 1;
                    }
                }
            }
        }
        if outliers_detected > 0 {
            tracing::debug!(asset = %asset, %variable, outliers_detected, outliers_clipped, "outliers detected");
        }

        let scaler = FittedScaler::fit(self.config.normalization, &values[split.train()]);
        let normalized = scaler.transform_all(&values);

        let observed = origin.iter().filter(|o| **o == ValueOrigin::Observed).count();
        let interpolated = origin
            .iter()
            .filter(|o| **o == ValueOrigin::Interpolated)
            .count();
        let extrapolated = origin.len() - observed - interpolated;
        let missing_fraction = if origin.is_empty() {
            0.0
        } else {
            (origin.len() - observed) as f64 / origin.len() as f64
        };

        let quality = VariableQuality {
            observed,
            interpolated,
            extrapolated,
            missing_fraction,
            exceeds_missing_threshold: missing_fraction > quality_settings.missing_value_threshold,
            longest_gap: gaps.iter().map(|g| g.len).max().unwrap_or(0),
            long_gaps: gaps
                .iter()
                .filter(|g| g.len > quality_settings.max_gap_len)
                .count(),
            outliers_detected,
            outliers_clipped,
            outlier_action: quality_settings.outlier_action,
        };

        Ok(VariableSeries {
            variable,
            original,
            values,
            normalized,
            origin,
            scaler,
            quality,
        })
    }
}

/// Acceptance band fitted on the training split, or `None` when the spread
/// is degenerate and nothing can be called an outlier.
fn outlier_bounds(train: &[f64], rule: OutlierRule) -> Option<(f64, f64)> {
    match rule {
        OutlierRule::ZScore { threshold } => {
            let (mean, std) = mean_and_std(train);
            (std > f64::EPSILON).then(|| (mean - threshold * std, mean + threshold * std))
        }
        OutlierRule::Iqr { multiplier } => {
            let (q1, _, q3) = quartiles(train);
            let iqr = q3 - q1;
            (iqr > f64::EPSILON).then(|| (q1 - multiplier * iqr, q3 + multiplier * iqr))
        }
    }
}
