//! Property-style tests for preprocessing and the metrics it feeds.

use coincast_core::{
    Interpolation, Normalization, QualitySettings, SplitFractions, UtcDateTime, Variable,
};
use coincast_ml::{
    compute_metrics, EvaluationEngine, ForecastRecord, PreprocessConfig, PreprocessingEngine,
    ValueOrigin, MAPE_EPSILON,
};
use coincast_tests::{asset, price_path, range, synthetic_series};

const NORMALIZATIONS: [Normalization; 3] = [
    Normalization::Minmax,
    Normalization::Standard,
    Normalization::Robust,
];

const INTERPOLATIONS: [Interpolation; 3] = [
    Interpolation::Linear,
    Interpolation::Polynomial,
    Interpolation::Spline,
];

fn engine(normalization: Normalization, interpolation: Interpolation) -> PreprocessingEngine {
    PreprocessingEngine::new(PreprocessConfig {
        variables: vec![Variable::Price, Variable::Volume],
        interpolation,
        normalization,
        split: SplitFractions {
            train: 0.8,
            validation: 0.1,
            test: 0.1,
        },
        quality: QualitySettings::default(),
    })
}

/// Prices with interior gaps of several lengths and a missing first and last day.
fn gappy_price(day: usize) -> Option<f64> {
    const MISSING: [usize; 9] = [0, 5, 6, 17, 18, 19, 20, 33, 59];
    (!MISSING.contains(&day)).then(|| price_path(day))
}

#[test]
fn normalizing_then_denormalizing_recovers_the_series() {
    let series = synthetic_series(&asset("bitcoin"), range("2024-01-01", "2024-02-29"), gappy_price);

    for normalization in NORMALIZATIONS {
        let processed = engine(normalization, Interpolation::Linear)
            .process(&series)
            .expect("processes");

        for variable in processed.variables() {
            let restored = variable.denormalize(&variable.normalized);
            for (original, back) in variable.values.iter().zip(&restored) {
                let tolerance = 1e-9 * original.abs().max(1.0);
                assert!(
                    (original - back).abs() <= tolerance,
                    "{normalization:?}/{}: {original} came back as {back}",
                    variable.variable
                );
            }
        }
    }
}

#[test]
fn interpolation_never_touches_present_values() {
    let series = synthetic_series(&asset("bitcoin"), range("2024-01-01", "2024-02-29"), gappy_price);

    for interpolation in INTERPOLATIONS {
        let processed = engine(Normalization::Minmax, interpolation)
            .process(&series)
            .expect("processes");
        let price = processed.target();

        for (day, (original, filled)) in price.original.iter().zip(&price.values).enumerate() {
            match original {
                Some(present) => {
                    assert_eq!(present.to_bits(), filled.to_bits(), "{interpolation:?} day {day}");
                    assert_eq!(price.origin[day], ValueOrigin::Observed);
                }
                None => {
                    assert!(filled.is_finite() && *filled >= 0.0);
                    assert_ne!(price.origin[day], ValueOrigin::Observed);
                }
            }
        }
        assert_eq!(price.origin[0], ValueOrigin::Extrapolated);
        assert_eq!(price.origin[59], ValueOrigin::Extrapolated);
        assert_eq!(price.origin[18], ValueOrigin::Interpolated);
        assert_eq!(price.quality.longest_gap, 4);
    }
}

#[test]
fn processing_the_same_series_twice_is_bit_identical() {
    let series = synthetic_series(&asset("ethereum"), range("2024-01-01", "2024-02-29"), gappy_price);

    for interpolation in INTERPOLATIONS {
        let engine = engine(Normalization::Robust, interpolation);
        let first = engine.process(&series).expect("first pass");
        let second = engine.process(&series).expect("second pass");

        assert_eq!(first, second);
        for (a, b) in first.variables().iter().zip(second.variables()) {
            let bits_a: Vec<u64> = a.normalized.iter().map(|v| v.to_bits()).collect();
            let bits_b: Vec<u64> = b.normalized.iter().map(|v| v.to_bits()).collect();
            assert_eq!(bits_a, bits_b);
        }
    }
}

#[test]
fn scaler_is_fitted_on_the_training_split_only() {
    // A steadily rising series: later splits lie above everything seen in training.
    let series = synthetic_series(&asset("solana"), range("2024-01-01", "2024-04-09"), |day| {
        Some(10.0 + day as f64)
    });

    let processed = engine(Normalization::Minmax, Interpolation::Linear)
        .process(&series)
        .expect("processes");
    let price = processed.target();
    let split = processed.split();

    let train_max = price.normalized[split.train()]
        .iter()
        .copied()
        .fold(f64::MIN, f64::max);
    assert!((train_max - 1.0).abs() < 1e-12);
    assert!(price.normalized[split.test()].iter().all(|v| *v > 1.0));
}

#[test]
fn a_zero_actual_never_produces_nan_or_infinity() {
    let actual = [0.0, 2.0, 4.0, 0.0, 8.0];
    let predicted = [0.5, 2.5, 3.5, 0.1, 8.0];

    let metrics = compute_metrics(&actual, &predicted, MAPE_EPSILON);

    assert!(metrics.mae.is_finite());
    assert!(metrics.rmse.is_finite());
    assert!(metrics.mape.is_some_and(f64::is_finite));
    assert!(metrics.r2.is_some_and(f64::is_finite));
    assert_eq!(metrics.mape_excluded, 2);
}

#[test]
fn a_zero_actual_in_the_test_period_is_excluded_from_mape_only() {
    let day = |d: u8| {
        UtcDateTime::parse(&format!("2024-03-{d:02}T00:00:00Z")).expect("valid timestamp")
    };
    let record = ForecastRecord {
        model: String::from("naive"),
        asset: asset("bitcoin"),
        timestamps: (1..=4).map(day).collect(),
        actual: vec![Some(10.0), Some(0.0), None, Some(12.0)],
        predicted: vec![11.0, 1.0, 5.0, 12.0],
    };

    let report = EvaluationEngine::default().evaluate(&[record]);

    let metrics = report.results[0].metrics;
    assert_eq!(metrics.points, 3);
    assert_eq!(metrics.skipped_imputed, 1);
    assert_eq!(metrics.mape_excluded, 1);
    assert!((metrics.mae - 2.0 / 3.0).abs() < 1e-12);
    assert!(metrics.mape.is_some_and(f64::is_finite));
    assert!(report.errors.is_empty());
}
