//! Analysis parameter set and its validation.
//!
//! [`RawParameters`] is the unvalidated, serde-friendly input (a JSON file,
//! CLI flags, a form). [`ParameterSet::validate`] checks every rule and
//! returns either an immutable [`ParameterSet`] or a [`ValidationReport`]
//! listing all violations.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::domain::parse_date;
use crate::{AssetId, CoreError, DateRange, ValidationError, ValidationReport, Variable};

/// Allowed deviation of the split sum from 1.0.
pub const SPLIT_TOLERANCE: f64 = 0.001;

/// Declared valid ranges for well-known hyperparameters: `(name, min, max, integer)`.
const HYPERPARAMETER_RANGES: &[(&str, f64, f64, bool)] = &[
    ("epochs", 1.0, 100.0, true),
    ("batch_size", 16.0, 512.0, true),
    ("learning_rate", 0.0001, 0.01, false),
    ("dropout", 0.0, 0.5, false),
    ("context_length", 1.0, 365.0, true),
];

/// Normalization applied to every selected variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Normalization {
    #[default]
    #[serde(alias = "min_max")]
    Minmax,
    Standard,
    Robust,
}

/// Gap-filling method for interior missing values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Interpolation {
    #[default]
    Linear,
    Polynomial,
    Spline,
}

/// Rule used to flag outliers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum OutlierRule {
    /// `|x - mean| / std > threshold`.
    ZScore { threshold: f64 },
    /// Outside `[q1 - multiplier * iqr, q3 + multiplier * iqr]`.
    Iqr { multiplier: f64 },
}

impl Default for OutlierRule {
    fn default() -> Self {
        Self::ZScore { threshold: 4.0 }
    }
}

/// What to do with detected outliers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutlierAction {
    Clip,
    #[default]
    Leave,
}

/// Data-quality thresholds used by preprocessing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualitySettings {
    pub outlier_rule: OutlierRule,
    pub outlier_action: OutlierAction,
    /// Gaps longer than this many consecutive points are flagged as long.
    pub max_gap_len: usize,
    /// Variables whose missing fraction exceeds this are flagged.
    pub missing_value_threshold: f64,
}

impl Default for QualitySettings {
    fn default() -> Self {
        Self {
            outlier_rule: OutlierRule::default(),
            outlier_action: OutlierAction::default(),
            max_gap_len: 7,
            missing_value_threshold: 0.05,
        }
    }
}

/// A single hyperparameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum HyperValue {
    Number(f64),
    Flag(bool),
    Text(String),
}

impl HyperValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(value) => Some(*value),
            Self::Flag(_) | Self::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value.as_str()),
            Self::Number(_) | Self::Flag(_) => None,
        }
    }
}

impl Display for HyperValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(value) => write!(f, "{value}"),
            Self::Flag(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

/// Bag of settings for one model.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hyperparameters(BTreeMap<String, HyperValue>);

impl Hyperparameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: HyperValue) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    pub fn with_number(self, name: impl Into<String>, value: f64) -> Self {
        self.with(name, HyperValue::Number(value))
    }

    pub fn get(&self, name: &str) -> Option<&HyperValue> {
        self.0.get(name)
    }

    pub fn number(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(HyperValue::as_f64)
    }

    pub fn number_or(&self, name: &str, default: f64) -> f64 {
        self.number(name).unwrap_or(default)
    }

    /// Integer setting, falling back to `default` when absent.
    pub fn count_or(&self, name: &str, default: usize) -> usize {
        self.number(name)
            .filter(|value| *value >= 0.0)
            .map(|value| value as usize)
            .unwrap_or(default)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &HyperValue)> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Unvalidated analysis parameters as collected from a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawParameters {
    pub assets: Vec<String>,
    pub start_date: String,
    pub end_date: String,
    pub variables: Vec<String>,
    pub normalization: Normalization,
    pub interpolation: Interpolation,
    pub train_split: f64,
    pub validation_split: f64,
    pub test_split: f64,
    pub models: BTreeMap<String, Hyperparameters>,
    pub quality: QualitySettings,
}

impl Default for RawParameters {
    fn default() -> Self {
        let defaults = || {
            Hyperparameters::new()
                .with_number("learning_rate", 0.001)
                .with_number("batch_size", 64.0)
                .with_number("epochs", 10.0)
        };

        let mut models = BTreeMap::new();
        models.insert(String::from("naive"), Hyperparameters::new());
        models.insert(String::from("drift"), Hyperparameters::new());
        models.insert(
            String::from("holt"),
            Hyperparameters::new()
                .with_number("alpha", 0.5)
                .with_number("beta", 0.1),
        );
        models.insert(
            String::from("linear_ar"),
            defaults().with_number("context_length", 30.0),
        );

        Self {
            assets: vec![
                String::from("bitcoin"),
                String::from("ethereum"),
                String::from("solana"),
            ],
            start_date: String::from("2020-06-02"),
            end_date: String::from("2025-07-31"),
            variables: Variable::ALL.iter().map(|v| v.as_str().to_owned()).collect(),
            normalization: Normalization::default(),
            interpolation: Interpolation::default(),
            train_split: 0.8,
            validation_split: 0.1,
            test_split: 0.1,
            models,
            quality: QualitySettings::default(),
        }
    }
}

impl RawParameters {
    /// Parses a JSON document; absent fields take their defaults.
    pub fn from_json(input: &str) -> Result<Self, CoreError> {
        Ok(serde_json::from_str(input)?)
    }

    pub fn to_json_pretty(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Train/validation/test fractions, chronologically ordered.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitFractions {
    pub train: f64,
    pub validation: f64,
    pub test: f64,
}

/// Validated, immutable analysis configuration consumed by every stage.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterSet {
    assets: Vec<AssetId>,
    date_range: DateRange,
    variables: Vec<Variable>,
    normalization: Normalization,
    interpolation: Interpolation,
    split: SplitFractions,
    models: BTreeMap<String, Hyperparameters>,
    quality: QualitySettings,
}

impl ParameterSet {
    /// Validates raw input, collecting every violation rather than the first.
    pub fn validate(raw: RawParameters) -> Result<Self, ValidationReport> {
        let mut errors = Vec::new();

        let mut assets = BTreeSet::new();
        for value in &raw.assets {
            match AssetId::parse(value) {
                Ok(asset) => {
                    assets.insert(asset);
                }
                Err(error) => errors.push(error),
            }
        }
        if raw.assets.is_empty() {
            errors.push(ValidationError::EmptyAssets);
        }

        let start = parse_date("start_date", &raw.start_date).map_err(|e| errors.push(e));
        let end = parse_date("end_date", &raw.end_date).map_err(|e| errors.push(e));
        let date_range = match (start, end) {
            (Ok(start), Ok(end)) => DateRange::new(start, end).map_err(|e| errors.push(e)).ok(),
            _ => None,
        };

        let mut variables = BTreeSet::new();
        for value in &raw.variables {
            match value.parse::<Variable>() {
                Ok(variable) => {
                    variables.insert(variable);
                }
                Err(error) => errors.push(error),
            }
        }
        if raw.variables.is_empty() {
            errors.push(ValidationError::EmptyVariables);
        } else if !variables.contains(&Variable::Price) {
            errors.push(ValidationError::MissingTargetVariable);
        }

        let split = SplitFractions {
            train: raw.train_split,
            validation: raw.validation_split,
            test: raw.test_split,
        };
        validate_split(&split, &mut errors);

        for (model, hyperparameters) in &raw.models {
            validate_hyperparameters(model, hyperparameters, &mut errors);
        }

        validate_quality(&raw.quality, &mut errors);

        match date_range {
            Some(date_range) if errors.is_empty() => Ok(Self {
                assets: assets.into_iter().collect(),
                date_range,
                variables: variables.into_iter().collect(),
                normalization: raw.normalization,
                interpolation: raw.interpolation,
                split,
                models: raw.models,
                quality: raw.quality,
            }),
            _ => Err(ValidationReport::new(errors)),
        }
    }

    /// Parses and validates in one step.
    pub fn from_json(input: &str) -> Result<Self, CoreError> {
        Ok(Self::validate(RawParameters::from_json(input)?)?)
    }

    pub fn assets(&self) -> &[AssetId] {
        &self.assets
    }

    pub fn date_range(&self) -> DateRange {
        self.date_range
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn normalization(&self) -> Normalization {
        self.normalization
    }

    pub fn interpolation(&self) -> Interpolation {
        self.interpolation
    }

    pub fn split(&self) -> SplitFractions {
        self.split
    }

    pub fn quality(&self) -> &QualitySettings {
        &self.quality
    }

    /// Settings configured for `model`; empty when the model has none.
    pub fn hyperparameters(&self, model: &str) -> Hyperparameters {
        self.models.get(model).cloned().unwrap_or_default()
    }

    pub fn configured_models(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }
}

fn validate_split(split: &SplitFractions, errors: &mut Vec<ValidationError>) {
    for (name, value) in [
        ("train", split.train),
        ("validation", split.validation),
        ("test", split.test),
    ] {
        if !value.is_finite() || value <= 0.0 || value >= 1.0 {
            errors.push(ValidationError::SplitOutOfRange { name, value });
        }
    }

    let sum = split.train + split.validation + split.test;
    if !sum.is_finite() || (sum - 1.0).abs() > SPLIT_TOLERANCE {
        errors.push(ValidationError::SplitSum {
            sum,
            tolerance: SPLIT_TOLERANCE,
        });
    }
}

fn validate_hyperparameters(
    model: &str,
    hyperparameters: &Hyperparameters,
    errors: &mut Vec<ValidationError>,
) {
    if model.trim().is_empty() {
        errors.push(ValidationError::EmptyModelName);
    }

    for (name, value) in hyperparameters.iter() {
        let declared = HYPERPARAMETER_RANGES
            .iter()
            .find(|(declared, ..)| *declared == name.as_str());

        let number = match (value, declared) {
            (HyperValue::Number(number), _) => *number,
            (_, Some(_)) => {
                errors.push(ValidationError::HyperparameterNotNumeric {
                    model: model.to_owned(),
                    name: name.clone(),
                });
                continue;
            }
            (_, None) => continue,
        };

        if !number.is_finite() {
            errors.push(ValidationError::HyperparameterNotFinite {
                model: model.to_owned(),
                name: name.clone(),
            });
            continue;
        }

        let Some(&(_, min, max, integer)) = declared else {
            continue;
        };

        if integer && number.fract() != 0.0 {
            errors.push(ValidationError::HyperparameterNotInteger {
                model: model.to_owned(),
                name: name.clone(),
                value: number,
            });
        }
        if number < min || number > max {
            errors.push(ValidationError::HyperparameterOutOfRange {
                model: model.to_owned(),
                name: name.clone(),
                value: number,
                min,
                max,
            });
        }
    }
}

fn validate_quality(quality: &QualitySettings, errors: &mut Vec<ValidationError>) {
    match quality.outlier_rule {
        OutlierRule::ZScore { threshold } if !(threshold.is_finite() && threshold > 0.0) => {
            errors.push(ValidationError::InvalidQualitySetting {
                field: "outlier_rule.threshold",
                reason: format!("must be a positive number, got {threshold}"),
            });
        }
        OutlierRule::Iqr { multiplier } if !(multiplier.is_finite() && multiplier > 0.0) => {
            errors.push(ValidationError::InvalidQualitySetting {
                field: "outlier_rule.multiplier",
                reason: format!("must be a positive number, got {multiplier}"),
            });
        }
        _ => {}
    }

    if quality.max_gap_len == 0 {
        errors.push(ValidationError::InvalidQualitySetting {
            field: "max_gap_len",
            reason: String::from("must be at least 1"),
        });
    }

    let threshold = quality.missing_value_threshold;
    if !(0.0..=1.0).contains(&threshold) {
        errors.push(ValidationError::InvalidQualitySetting {
            field: "missing_value_threshold",
            reason: format!("must be within [0, 1], got {threshold}"),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_parameters_are_valid() {
        let params = ParameterSet::validate(RawParameters::default()).expect("defaults validate");

        assert_eq!(params.assets().len(), 3);
        assert_eq!(params.variables().len(), 3);
        assert_eq!(params.normalization(), Normalization::Minmax);
        assert_eq!(params.interpolation(), Interpolation::Linear);
    }

    #[test]
    fn split_within_tolerance_is_accepted() {
        let raw = RawParameters {
            train_split: 0.7,
            validation_split: 0.15,
            test_split: 0.1505,
            ..RawParameters::default()
        };

        assert!(ParameterSet::validate(raw).is_ok());
    }

    #[test]
    fn split_outside_tolerance_is_rejected() {
        let raw = RawParameters {
            train_split: 0.7,
            validation_split: 0.15,
            test_split: 0.1,
            ..RawParameters::default()
        };

        let report = ParameterSet::validate(raw).expect_err("must fail");
        assert!(report.contains(|e| matches!(e, ValidationError::SplitSum { .. })));
    }

    #[test]
    fn reports_every_violation_at_once() {
        let mut raw = RawParameters {
            assets: Vec::new(),
            start_date: String::from("2024-02-01"),
            end_date: String::from("2024-01-01"),
            train_split: 0.9,
            ..RawParameters::default()
        };
        raw.models.insert(
            String::from("linear_ar"),
            Hyperparameters::new()
                .with_number("epochs", 500.0)
                .with_number("learning_rate", 0.5),
        );

        let report = ParameterSet::validate(raw).expect_err("must fail");

        assert!(report.contains(|e| matches!(e, ValidationError::EmptyAssets)));
        assert!(report.contains(|e| matches!(e, ValidationError::InvertedDateRange { .. })));
        assert!(report.contains(|e| matches!(e, ValidationError::SplitSum { .. })));
        assert_eq!(
            report
                .errors()
                .iter()
                .filter(|e| matches!(e, ValidationError::HyperparameterOutOfRange { .. }))
                .count(),
            2
        );
    }

    #[test]
    fn non_integer_epochs_are_rejected() {
        let mut raw = RawParameters::default();
        raw.models.insert(
            String::from("custom"),
            Hyperparameters::new().with_number("epochs", 2.5),
        );

        let report = ParameterSet::validate(raw).expect_err("must fail");
        assert!(report.contains(|e| matches!(
            e,
            ValidationError::HyperparameterNotInteger { name, .. } if name == "epochs"
        )));
    }

    #[test]
    fn price_must_be_selected() {
        let raw = RawParameters {
            variables: vec![String::from("volume")],
            ..RawParameters::default()
        };

        let report = ParameterSet::validate(raw).expect_err("must fail");
        assert!(report.contains(|e| matches!(e, ValidationError::MissingTargetVariable)));
    }

    #[test]
    fn duplicate_assets_collapse() {
        let raw = RawParameters {
            assets: vec![String::from("bitcoin"), String::from(" BITCOIN ")],
            ..RawParameters::default()
        };

        let params = ParameterSet::validate(raw).expect("valid");
        assert_eq!(params.assets().len(), 1);
    }

    #[test]
    fn raw_parameters_deserialize_with_defaults() {
        let raw: RawParameters = serde_json::from_str(
            r#"{
                "assets": ["bitcoin"],
                "normalization": "robust",
                "interpolation": "spline",
                "quality": { "outlier_rule": { "rule": "iqr", "multiplier": 1.5 } }
            }"#,
        )
        .expect("valid json");

        assert_eq!(raw.assets, vec![String::from("bitcoin")]);
        assert_eq!(raw.normalization, Normalization::Robust);
        assert_eq!(raw.interpolation, Interpolation::Spline);
        assert_eq!(raw.quality.outlier_rule, OutlierRule::Iqr { multiplier: 1.5 });
        assert_eq!(raw.train_split, 0.8);
    }

    #[test]
    fn from_json_distinguishes_syntax_and_validation_errors() {
        let syntax = ParameterSet::from_json("{ not json").expect_err("bad json");
        assert!(matches!(syntax, CoreError::Serialization(_)));

        let invalid = ParameterSet::from_json(r#"{ "assets": [] }"#).expect_err("no assets");
        match invalid {
            CoreError::InvalidParameters(report) => {
                assert!(report.contains(|e| matches!(e, ValidationError::EmptyAssets)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
