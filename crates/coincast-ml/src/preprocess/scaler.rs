use coincast_core::Normalization;
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics, Statistics};

/// Normalization parameters fitted on a training split.
///
/// Every variant is an affine map `(x - offset) / scale`, so the inverse is
/// exact up to floating-point rounding. A degenerate spread (constant
/// training data) fits a scale of 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum FittedScaler {
    Minmax { min: f64, max: f64, scale: f64 },
    Standard { mean: f64, std: f64, scale: f64 },
    Robust { median: f64, iqr: f64, scale: f64 },
}

impl FittedScaler {
    /// Fits on `train`, which must be non-empty and finite.
    pub fn fit(method: Normalization, train: &[f64]) -> Self {
        match method {
            Normalization::Minmax => {
                let min = train.iter().copied().fold(f64::INFINITY, f64::min);
                let max = train.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                Self::Minmax {
                    min,
                    max,
                    scale: non_degenerate(max - min),
                }
            }
            Normalization::Standard => {
                let (mean, std) = mean_and_std(train);
                Self::Standard {
                    mean,
                    std,
                    scale: non_degenerate(std),
                }
            }
            Normalization::Robust => {
                let (q1, median, q3) = quartiles(train);
                let iqr = q3 - q1;
                Self::Robust {
                    median,
                    iqr,
                    scale: non_degenerate(iqr),
                }
            }
        }
    }

    pub fn method(&self) -> Normalization {
        match self {
            Self::Minmax { .. } => Normalization::Minmax,
            Self::Standard { .. } => Normalization::Standard,
            Self::Robust { .. } => Normalization::Robust,
        }
    }

    fn offset_and_scale(&self) -> (f64, f64) {
        match *self {
            Self::Minmax { min, scale, .. } => (min, scale),
            Self::Standard { mean, scale, .. } => (mean, scale),
            Self::Robust { median, scale, .. } => (median, scale),
        }
    }

    pub fn transform(&self, value: f64) -> f64 {
        let (offset, scale) = self.offset_and_scale();
        (value - offset) / scale
    }

    pub fn inverse(&self, value: f64) -> f64 {
        let (offset, scale) = self.offset_and_scale();
        value * scale + offset
    }

    pub fn transform_all(&self, values: &[f64]) -> Vec<f64> {
        values.iter().map(|&v| self.transform(v)).collect()
    }

    pub fn inverse_all(&self, values: &[f64]) -> Vec<f64> {
        values.iter().map(|&v| self.inverse(v)).collect()
    }

    /// Converts a spread measured in normalized units back to original units.
    pub fn inverse_spread(&self, spread: f64) -> f64 {
        spread * self.offset_and_scale().1
    }
}

fn non_degenerate(spread: f64) -> f64 {
    if spread.is_finite() && spread > f64::EPSILON {
        spread
    } else {
        1.0
    }
}

/// Mean and population standard deviation, both 0.0 for an empty slice.
pub(crate) fn mean_and_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    (values.iter().mean(), values.iter().population_std_dev())
}

/// Lower quartile, median and upper quartile (R-8 quantiles), all 0.0 for an
/// empty slice.
pub(crate) fn quartiles(values: &[f64]) -> (f64, f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0, 0.0);
    }
    let mut data = Data::new(values.to_vec());
    (data.lower_quartile(), data.median(), data.upper_quartile())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRAIN: [f64; 5] = [10.0, 12.0, 11.0, 15.0, 20.0];

    #[test]
    fn minmax_maps_training_range_to_unit_interval() {
        let scaler = FittedScaler::fit(Normalization::Minmax, &TRAIN);

        assert_eq!(scaler.transform(10.0), 0.0);
        assert_eq!(scaler.transform(20.0), 1.0);
        assert!(scaler.transform(25.0) > 1.0);
    }

    #[test]
    fn standard_centers_on_mean() {
        let scaler = FittedScaler::fit(Normalization::Standard, &TRAIN);
        let normalized = scaler.transform_all(&TRAIN);

        let (mean, std) = mean_and_std(&normalized);
        assert!(mean.abs() < 1e-12);
        assert!((std - 1.0).abs() < 1e-12);
    }

    #[test]
    fn robust_uses_median_and_iqr() {
        let scaler = FittedScaler::fit(Normalization::Robust, &TRAIN);

        match scaler {
            FittedScaler::Robust { median, iqr, .. } => {
                // Quartiles of 10, 11, 12, 15, 20 are 10 2/3 and 16 2/3.
                assert_eq!(median, 12.0);
                assert!((iqr - 6.0).abs() < 1e-9, "iqr = {iqr}");
            }
            other => panic!("unexpected scaler: {other:?}"),
        }
    }

    #[test]
    fn every_method_inverts_exactly() {
        for method in [
            Normalization::Minmax,
            Normalization::Standard,
            Normalization::Robust,
        ] {
            let scaler = FittedScaler::fit(method, &TRAIN);
            for value in [0.0, 10.0, 13.37, 250_000.5] {
                let restored = scaler.inverse(scaler.transform(value));
                assert!(
                    (restored - value).abs() <= 1e-9 * value.abs().max(1.0),
                    "{method:?}: {value} -> {restored}"
                );
            }
        }
    }

    #[test]
    fn constant_training_data_keeps_transform_invertible() {
        let scaler = FittedScaler::fit(Normalization::Minmax, &[7.0, 7.0, 7.0]);

        assert_eq!(scaler.transform(7.0), 0.0);
        assert_eq!(scaler.inverse(scaler.transform(9.0)), 9.0);
    }
}
