//! Wilcoxon signed-rank test with the normal approximation.

use serde::Serialize;
use statrs::distribution::{ContinuousCDF, Normal};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct WilcoxonOutcome {
    /// Non-zero differences that entered the ranking.
    pub n: usize,
    pub w_plus: f64,
    pub w_minus: f64,
    pub z: f64,
    pub p_value: f64,
}

impl WilcoxonOutcome {
    /// `min(W+, W-)`, the classical test statistic.
    pub fn statistic(&self) -> f64 {
        self.w_plus.min(self.w_minus)
    }
}

/// Two-sided test that paired differences are centred on zero.
///
/// Zero differences are dropped, tied magnitudes share their average rank
/// and the variance is tie-corrected. A continuity correction of 0.5 is
/// applied. With no usable differences the p-value is 1.
pub fn wilcoxon_signed_rank(differences: &[f64]) -> WilcoxonOutcome {
    let mut nonzero: Vec<f64> = differences
        .iter()
        .copied()
        .filter(|d| d.is_finite() && *d != 0.0)
        .collect();
    nonzero.sort_by(|a, b| a.abs().total_cmp(&b.abs()));
    let n = nonzero.len();

    let mut w_plus = 0.0;
    let mut w_minus = 0.0;
    let mut tie_correction = 0.0;
    let mut start = 0;
    while start < n {
        let mut end = start + 1;
        while end < n && nonzero[end].abs() == nonzero[start].abs() {
            end += 1;
        }
        // Ranks are 1-based; a tie group shares the average rank.
        let rank = (start + 1 + end) as f64 / 2.0;
        let ties = (end - start) as f64;
        tie_correction += ties.powi(3) - ties;
        for &d in &nonzero[start..end] {
            if d > 0.0 {
                w_plus += rank;
            } else {
                w_minus += rank;
            }
        }
        start = end;
    }

    let nf = n as f64;
    let expected = nf * (nf + 1.0) / 4.0;
    let variance = nf * (nf + 1.0) * (2.0 * nf + 1.0) / 24.0 - tie_correction / 48.0;
    if n == 0 || variance <= 0.0 {
        return WilcoxonOutcome {
            n,
            w_plus,
            w_minus,
            z: 0.0,
            p_value: 1.0,
        };
    }

    let deviation = ((w_plus - expected).abs() - 0.5).max(0.0);
    let z = (deviation / variance.sqrt()).copysign(w_plus - expected);
    let p_value = Normal::new(0.0, 1.0)
        .map_or(1.0, |standard| 2.0 * (1.0 - standard.cdf(z.abs())))
        .clamp(0.0, 1.0);

    WilcoxonOutcome {
        n,
        w_plus,
        w_minus,
        z,
        p_value,
    }
}
