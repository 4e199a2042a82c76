//! # Evaluation Engine
//!
//! Accuracy metrics per (model, asset), per-model aggregates, pairwise
//! significance tests and the ranking.
//!
//! Metrics are computed in original units against observed test actuals
//! only; points whose actual was imputed during preprocessing are skipped.
//!
//! | Metric | Definition |
//! |--------|------------|
//! | MAE | `mean(|pred - actual|)` |
//! | RMSE | `sqrt(mean((pred - actual)^2))` |
//! | MAPE | `mean(|pred - actual| / |actual|) * 100`, excluding `|actual| < 1e-8` |
//! | R² | `1 - SS_res / SS_tot`, absent when `SS_tot = 0` |

mod significance;

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

use coincast_core::{AssetId, UtcDateTime};
use serde::Serialize;

use crate::error::EvaluationError;

pub use significance::{wilcoxon_signed_rank, WilcoxonOutcome};

/// Actuals with a smaller magnitude are excluded from MAPE.
pub const MAPE_EPSILON: f64 = 1e-8;
pub const DEFAULT_ALPHA: f64 = 0.05;

const TIE_TOLERANCE: f64 = 1e-12;

/// Test-period forecasts of one model for one asset, in original units.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastRecord {
    pub model: String,
    pub asset: AssetId,
    pub timestamps: Vec<UtcDateTime>,
    /// `None` where the actual was imputed rather than observed.
    pub actual: Vec<Option<f64>>,
    pub predicted: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Metrics {
    pub mae: f64,
    pub rmse: f64,
    pub mape: Option<f64>,
    pub r2: Option<f64>,
    /// Observed points evaluated.
    pub points: usize,
    /// Points left out of MAPE because the actual was near zero.
    pub mape_excluded: usize,
    /// Points skipped because the actual was imputed.
    pub skipped_imputed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationResult {
    pub model: String,
    pub asset: AssetId,
    pub metrics: Metrics,
}

/// Mean of each metric across the assets a model was evaluated on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelAggregate {
    pub model: String,
    pub assets: usize,
    pub mean_mae: f64,
    pub mean_rmse: f64,
    pub mean_mape: Option<f64>,
    pub mean_r2: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairwiseComparison {
    pub model_a: String,
    pub model_b: String,
    /// Points paired on (asset, timestamp).
    pub pairs: usize,
    pub mean_abs_error_a: f64,
    pub mean_abs_error_b: f64,
    pub test: WilcoxonOutcome,
    pub significant: bool,
    /// Model with the lower mean absolute error, when the difference is significant.
    pub better: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Ranking {
    pub best_per_asset: BTreeMap<AssetId, String>,
    /// Models ordered best first. A model evaluated on more assets always
    /// ranks above one evaluated on fewer.
    pub overall: Vec<String>,
    /// Models missing a result for at least one evaluated asset.
    pub partial_coverage: Vec<String>,
}

impl Ranking {
    pub fn winner(&self) -> Option<&str> {
        self.overall.first().map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub results: Vec<EvaluationResult>,
    pub aggregates: Vec<ModelAggregate>,
    pub comparisons: Vec<PairwiseComparison>,
    pub ranking: Ranking,
    pub errors: Vec<EvaluationError>,
}

impl EvaluationReport {
    pub fn result(&self, model: &str, asset: &AssetId) -> Option<&EvaluationResult> {
        self.results
            .iter()
            .find(|r| r.model == model && &r.asset == asset)
    }

    pub fn assets(&self) -> BTreeSet<&AssetId> {
        self.results.iter().map(|r| &r.asset).collect()
    }

    pub fn comparison(&self, a: &str, b: &str) -> Option<&PairwiseComparison> {
        self.comparisons.iter().find(|c| {
            (c.model_a == a && c.model_b == b) || (c.model_a == b && c.model_b == a)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvaluationEngine {
    alpha: f64,
    mape_epsilon: f64,
}

impl Default for EvaluationEngine {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_ALPHA,
            mape_epsilon: MAPE_EPSILON,
        }
    }
}

impl EvaluationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn evaluate(&self, records: &[ForecastRecord]) -> EvaluationReport {
        let mut report = EvaluationReport::default();
        // (model, asset, timestamp) -> absolute error, for pairing.
        let mut errors_by_model: BTreeMap<&str, BTreeMap<(&AssetId, UtcDateTime), f64>> =
            BTreeMap::new();

        for record in records {
            if record.predicted.len() != record.actual.len()
                || record.timestamps.len() != record.actual.len()
            {
                report.errors.push(EvaluationError::LengthMismatch {
                    model: record.model.clone(),
                    asset: record.asset.clone(),
                    predicted: record.predicted.len(),
                    actual: record.actual.len(),
                });
                continue;
            }

            let mut actual = Vec::with_capacity(record.actual.len());
            let mut predicted = Vec::with_capacity(record.actual.len());
            let paired = errors_by_model.entry(record.model.as_str()).or_default();
            for ((ts, a), p) in record
                .timestamps
                .iter()
                .zip(&record.actual)
                .zip(&record.predicted)
            {
                if let Some(a) = a {
                    actual.push(*a);
                    predicted.push(*p);
                    paired.insert((&record.asset, *ts), (p - a).abs());
                }
            }

            if actual.is_empty() {
                report.errors.push(EvaluationError::NoComparablePoints {
                    model: record.model.clone(),
                    asset: record.asset.clone(),
                });
                continue;
            }

            let mut metrics = compute_metrics(&actual, &predicted, self.mape_epsilon);
            metrics.skipped_imputed = record.actual.len() - actual.len();
            if metrics.mape.is_none() {
                report.errors.push(EvaluationError::MapeUndefined {
                    model: record.model.clone(),
                    asset: record.asset.clone(),
                });
            }

            report.results.push(EvaluationResult {
                model: record.model.clone(),
                asset: record.asset.clone(),
                metrics,
            });
        }

        report.aggregates = aggregate(&report.results);
        report.comparisons = self.compare(&errors_by_model);
        report.ranking = rank(&report.results, &report.aggregates);

        tracing::info!(
            results = report.results.len(),
            comparisons = report.comparisons.len(),
            winner = report.ranking.winner().unwrap_or("none"),
            "evaluation finished"
        );
        report
    }

    fn compare(
        &self,
        errors_by_model: &BTreeMap<&str, BTreeMap<(&AssetId, UtcDateTime), f64>>,
    ) -> Vec<PairwiseComparison> {
        let models: Vec<&str> = errors_by_model.keys().copied().collect();
        let mut comparisons = Vec::new();

        for (i, a) in models.iter().enumerate() {
            for b in &models[i + 1..] {
                let errors_a = &errors_by_model[a];
                let errors_b = &errors_by_model[b];
                let (abs_a, abs_b): (Vec<f64>, Vec<f64>) = errors_a
                    .iter()
                    .filter_map(|(key, ea)| errors_b.get(key).map(|eb| (*ea, *eb)))
                    .unzip();
                let differences: Vec<f64> =
                    abs_a.iter().zip(&abs_b).map(|(ea, eb)| ea - eb).collect();

                let test = wilcoxon_signed_rank(&differences);
                let (mean_a, _) = crate::preprocess::mean_and_std(&abs_a);
                let (mean_b, _) = crate::preprocess::mean_and_std(&abs_b);
                let significant = test.n > 0 && test.p_value < self.alpha;
                let better = significant.then(|| {
                    if mean_a <= mean_b {
                        (*a).to_owned()
                    } else {
                        (*b).to_owned()
                    }
                });

                comparisons.push(PairwiseComparison {
                    model_a: (*a).to_owned(),
                    model_b: (*b).to_owned(),
                    pairs: abs_a.len(),
                    mean_abs_error_a: mean_a,
                    mean_abs_error_b: mean_b,
                    test,
                    significant,
                    better,
                });
            }
        }
        comparisons
    }
}

/// Metrics over equal-length, non-empty slices of observed values.
pub fn compute_metrics(actual: &[f64], predicted: &[f64], mape_epsilon: f64) -> Metrics {
    let n = actual.len().max(1) as f64;
    let mut abs_sum = 0.0;
    let mut sq_sum = 0.0;
    let mut pct_sum = 0.0;
    let mut pct_count = 0_usize;

    for (a, p) in actual.iter().zip(predicted) {
        let error = p - a;
        abs_sum += error.abs();
        sq_sum += error * error;
        if a.abs() >= mape_epsilon {
            pct_sum += (error / a).abs();
            pct_count += 1;
        }
    }

    let mean_actual = actual.iter().sum::<f64>() / n;
    let ss_tot: f64 = actual.iter().map(|a| (a - mean_actual).powi(2)).sum();

    Metrics {
        mae: abs_sum / n,
        rmse: (sq_sum / n).sqrt(),
        mape: (pct_count > 0).then(|| pct_sum / pct_count as f64 * 100.0),
        r2: (ss_tot > 0.0).then(|| 1.0 - sq_sum / ss_tot),
        points: actual.len(),
        mape_excluded: actual.len() - pct_count,
        skipped_imputed: 0,
    }
}

fn aggregate(results: &[EvaluationResult]) -> Vec<ModelAggregate> {
    let mut by_model: BTreeMap<&str, Vec<&Metrics>> = BTreeMap::new();
    for result in results {
        by_model
            .entry(result.model.as_str())
            .or_default()
            .push(&result.metrics);
    }

    by_model
        .into_iter()
        .map(|(model, metrics)| {
            let mean_of = |values: Vec<f64>| {
                (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
            };
            ModelAggregate {
                model: model.to_owned(),
                assets: metrics.len(),
                mean_mae: mean_of(metrics.iter().map(|m| m.mae).collect()).unwrap_or(0.0),
                mean_rmse: mean_of(metrics.iter().map(|m| m.rmse).collect()).unwrap_or(0.0),
                mean_mape: mean_of(metrics.iter().filter_map(|m| m.mape).collect()),
                mean_r2: mean_of(metrics.iter().filter_map(|m| m.r2).collect()),
            }
        })
        .collect()
}

/// Lower MAPE wins; near-equal MAPE falls to higher R², then lower MAE.
/// Without MAPE on either side, lower MAE decides.
fn compare_scores(
    (mape_a, r2_a, mae_a): (Option<f64>, Option<f64>, f64),
    (mape_b, r2_b, mae_b): (Option<f64>, Option<f64>, f64),
) -> Ordering {
    let by_r2_then_mae = || {
        let r2_a = r2_a.unwrap_or(f64::NEG_INFINITY);
        let r2_b = r2_b.unwrap_or(f64::NEG_INFINITY);
        r2_b.total_cmp(&r2_a).then(mae_a.total_cmp(&mae_b))
    };

    match (mape_a, mape_b) {
        (Some(a), Some(b)) if (a - b).abs() > TIE_TOLERANCE => a.total_cmp(&b),
        (Some(_), Some(_)) => by_r2_then_mae(),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => mae_a.total_cmp(&mae_b).then_with(by_r2_then_mae),
    }
}

fn rank(results: &[EvaluationResult], aggregates: &[ModelAggregate]) -> Ranking {
    let mut best_per_asset: BTreeMap<AssetId, &EvaluationResult> = BTreeMap::new();
    for result in results {
        let candidate = (result.metrics.mape, result.metrics.r2, result.metrics.mae);
        let replace = match best_per_asset.get(&result.asset) {
            Some(best) => {
                let current = (best.metrics.mape, best.metrics.r2, best.metrics.mae);
                compare_scores(candidate, current) == Ordering::Less
            }
            None => true,
        };
        if replace {
            best_per_asset.insert(result.asset.clone(), result);
        }
    }

    // Means over different asset sets are not comparable.
    let mut ordered: Vec<&ModelAggregate> = aggregates.iter().collect();
    ordered.sort_by(|a, b| {
        b.assets
            .cmp(&a.assets)
            .then_with(|| {
                compare_scores(
                    (a.mean_mape, a.mean_r2, a.mean_mae),
                    (b.mean_mape, b.mean_r2, b.mean_mae),
                )
            })
            .then_with(|| a.model.cmp(&b.model))
    });

    let evaluated_assets = best_per_asset.len();
    let partial_coverage: Vec<String> = ordered
        .iter()
        .filter(|a| a.assets < evaluated_assets)
        .map(|a| a.model.clone())
        .collect();
    if !partial_coverage.is_empty() {
        tracing::warn!(
            evaluated_assets,
            models = ?partial_coverage,
            "models without a result for every asset rank below full coverage"
        );
    }

    Ranking {
        best_per_asset: best_per_asset
            .into_iter()
            .map(|(asset, result)| (asset, result.model.clone()))
            .collect(),
        overall: ordered.into_iter().map(|a| a.model.clone()).collect(),
        partial_coverage,
    }
}

#[cfg(test)]
mod tests {
    use time::macros::date;

    use super::*;

    fn asset(id: &str) -> AssetId {
        AssetId::parse(id).expect("valid")
    }

    fn record(model: &str, asset_id: &str, actual: &[f64], predicted: &[f64]) -> ForecastRecord {
        let start = date!(2024 - 03 - 01);
        ForecastRecord {
            model: model.to_owned(),
            asset: asset(asset_id),
            timestamps: (0..actual.len())
                .map(|i| UtcDateTime::start_of_day(start + time::Duration::days(i as i64)))
                .collect(),
            actual: actual.iter().copied().map(Some).collect(),
            predicted: predicted.to_vec(),
        }
    }

    #[test]
    fn metrics_follow_standard_definitions() {
        let metrics = compute_metrics(&[100.0, 200.0, 300.0], &[110.0, 190.0, 300.0], MAPE_EPSILON);

        assert!((metrics.mae - 20.0 / 3.0).abs() < 1e-12);
        assert!((metrics.rmse - (200.0_f64 / 3.0).sqrt()).abs() < 1e-12);
        assert!((metrics.mape.expect("defined") - 5.0).abs() < 1e-12);
        assert!((metrics.r2.expect("defined") - (1.0 - 200.0 / 20_000.0)).abs() < 1e-12);
    }

    #[test]
    fn zero_actual_is_excluded_from_mape() {
        let metrics = compute_metrics(&[0.0, 50.0], &[1.0, 55.0], MAPE_EPSILON);

        assert_eq!(metrics.mape_excluded, 1);
        assert!((metrics.mape.expect("one usable point") - 10.0).abs() < 1e-12);
        assert!(metrics.mae.is_finite() && metrics.rmse.is_finite());
        assert!(metrics.r2.expect("varying actuals").is_finite());
    }

    #[test]
    fn all_zero_actuals_degrade_to_mae_and_flag() {
        let report = EvaluationEngine::new().evaluate(&[record("a", "bitcoin", &[0.0, 0.0], &[1.0, 2.0])]);

        let metrics = report.results[0].metrics;
        assert!(metrics.mape.is_none());
        assert!(metrics.r2.is_none());
        assert_eq!(metrics.mae, 1.5);
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, EvaluationError::MapeUndefined { .. })));
    }

    #[test]
    fn imputed_actuals_are_skipped() {
        let mut input = record("a", "bitcoin", &[10.0, 20.0, 30.0], &[10.0, 25.0, 30.0]);
        input.actual[1] = None;

        let report = EvaluationEngine::new().evaluate(&[input]);

        let metrics = report.results[0].metrics;
        assert_eq!(metrics.points, 2);
        assert_eq!(metrics.skipped_imputed, 1);
        assert_eq!(metrics.mae, 0.0);
    }

    #[test]
    fn exact_model_outranks_mean_model() {
        let actual: Vec<f64> = (0..12).map(|i| 100.0 + 3.0 * i as f64).collect();
        let mean = vec![90.0; actual.len()];

        let report = EvaluationEngine::new().evaluate(&[
            record("mean", "bitcoin", &actual, &mean),
            record("exact", "bitcoin", &actual, &actual),
        ]);

        assert_eq!(report.ranking.winner(), Some("exact"));
        assert_eq!(report.ranking.best_per_asset[&asset("bitcoin")], "exact");
        let comparison = report.comparison("exact", "mean").expect("pair compared");
        assert!(comparison.significant);
        assert_eq!(comparison.better.as_deref(), Some("exact"));
        assert_eq!(comparison.pairs, 12);
    }

    #[test]
    fn mape_tie_is_broken_by_r2() {
        let aggregates = vec![
            ModelAggregate {
                model: String::from("a"),
                assets: 1,
                mean_mae: 1.0,
                mean_rmse: 1.0,
                mean_mape: Some(5.0),
                mean_r2: Some(0.4),
            },
            ModelAggregate {
                model: String::from("b"),
                assets: 1,
                mean_mae: 1.0,
                mean_rmse: 1.0,
                mean_mape: Some(5.0),
                mean_r2: Some(0.9),
            },
        ];

        let ranking = rank(&[], &aggregates);
        assert_eq!(ranking.overall, vec![String::from("b"), String::from("a")]);
    }

    #[test]
    fn a_model_missing_an_asset_ranks_below_full_coverage() {
        // given: x is near-perfect on bitcoin but has nothing for solana
        let bitcoin: Vec<f64> = (0..10).map(|i| 100.0 + i as f64).collect();
        let solana: Vec<f64> = (0..10).map(|i| 20.0 + i as f64).collect();
        let x_bitcoin: Vec<f64> = bitcoin.iter().map(|a| a * 1.02).collect();
        let y_bitcoin: Vec<f64> = bitcoin.iter().map(|a| a * 1.03).collect();
        let y_solana: Vec<f64> = solana.iter().map(|a| a * 1.4).collect();

        // when
        let report = EvaluationEngine::new().evaluate(&[
            record("x", "bitcoin", &bitcoin, &x_bitcoin),
            record("y", "bitcoin", &bitcoin, &y_bitcoin),
            record("y", "solana", &solana, &y_solana),
        ]);

        // then: y covers both assets and leads despite its larger mean MAPE
        assert_eq!(report.ranking.overall, vec![String::from("y"), String::from("x")]);
        assert_eq!(report.ranking.partial_coverage, vec![String::from("x")]);
        assert_eq!(report.ranking.best_per_asset[&asset("bitcoin")], "x");
        assert_eq!(report.ranking.best_per_asset[&asset("solana")], "y");
    }

    #[test]
    fn length_mismatch_is_reported_not_evaluated() {
        let mut broken = record("a", "bitcoin", &[1.0, 2.0], &[1.0, 2.0]);
        broken.predicted.pop();

        let report = EvaluationEngine::new().evaluate(&[broken]);

        assert!(report.results.is_empty());
        assert!(matches!(
            report.errors[0],
            EvaluationError::LengthMismatch { predicted: 1, actual: 2, .. }
        ));
    }
}
