//! Gap location and filling.
//!
//! Positions are day indices of a daily-aligned series, so the x axis is
//! uniform. Present values are never modified. Filled values are clamped at
//! zero because every market variable is non-negative.

use coincast_core::Interpolation;
use serde::{Deserialize, Serialize};

/// Where a preprocessed value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueOrigin {
    Observed,
    Interpolated,
    /// Edge gap filled with the nearest known value.
    Extrapolated,
}

/// Maximal run of consecutive absent values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gap {
    pub start: usize,
    pub len: usize,
}

impl Gap {
    pub fn end(&self) -> usize {
        self.start + self.len
    }
}

pub fn find_gaps(values: &[Option<f64>]) -> Vec<Gap> {
    let mut gaps = Vec::new();
    let mut current: Option<usize> = None;

    for (index, value) in values.iter().enumerate() {
        match (value, current) {
            (None, None) => current = Some(index),
            (Some(_), Some(start)) => {
                gaps.push(Gap {
                    start,
                    len: index - start,
                });
                current = None;
            }
            _ => {}
        }
    }
    if let Some(start) = current {
        gaps.push(Gap {
            start,
            len: values.len() - start,
        });
    }
    gaps
}

/// Fills every absent entry. Returns `None` when nothing is observed.
pub fn fill(values: &[Option<f64>], method: Interpolation) -> Option<(Vec<f64>, Vec<ValueOrigin>)> {
    let known: Vec<(usize, f64)> = values
        .iter()
        .enumerate()
        .filter_map(|(index, value)| value.map(|v| (index, v)))
        .collect();
    let (first, last) = (*known.first()?, *known.last()?);

    let spline = match method {
        Interpolation::Spline if known.len() >= 3 => NaturalSpline::fit(&known),
        _ => None,
    };

    let mut filled = Vec::with_capacity(values.len());
    let mut origin = Vec::with_capacity(values.len());
    // Index into `known` of the last known point at or before the cursor.
    let mut left = 0_usize;

    for (index, value) in values.iter().enumerate() {
        if let Some(v) = value {
            filled.push(*v);
            origin.push(ValueOrigin::Observed);
            if known.get(left + 1).map(|&(i, _)| i == index).unwrap_or(false) {
                left += 1;
            }
            continue;
        }

        if index < first.0 {
            filled.push(first.1);
            origin.push(ValueOrigin::Extrapolated);
        } else if index > last.0 {
            filled.push(last.1);
            origin.push(ValueOrigin::Extrapolated);
        } else {
            let estimate = match (method, &spline) {
                (Interpolation::Spline, Some(spline)) => spline.evaluate(index as f64),
                (Interpolation::Polynomial, _) => local_quadratic(&known, left, index as f64),
                _ => linear(known[left], known[left + 1], index as f64),
            };
            filled.push(estimate.max(0.0));
            origin.push(ValueOrigin::Interpolated);
        }
    }

    Some((filled, origin))
}

fn linear(a: (usize, f64), b: (usize, f64), x: f64) -> f64 {
    let (xa, ya) = (a.0 as f64, a.1);
    let (xb, yb) = (b.0 as f64, b.1);
    ya + (yb - ya) * (x - xa) / (xb - xa)
}

/// Least-squares quadratic over up to three known points on each side of
/// the gap bounded by `known[left]` and `known[left + 1]`.
fn local_quadratic(known: &[(usize, f64)], left: usize, x: f64) -> f64 {
    let from = left.saturating_sub(2);
    let to = (left + 4).min(known.len());
    let window = &known[from..to];

    if window.len() < 3 {
        return linear(known[left], known[left + 1], x);
    }

    // Center on the left bound for conditioning.
    let origin = known[left].0 as f64;
    let mut normal = [[0.0_f64; 3]; 3];
    let mut rhs = [0.0_f64; 3];
    for &(xi, yi) in window {
        let t = xi as f64 - origin;
        let powers = [1.0, t, t * t];
        for row in 0..3 {
            for col in 0..3 {
                normal[row][col] += powers[row] * powers[col];
            }
            rhs[row] += powers[row] * yi;
        }
    }

    match solve3(normal, rhs) {
        Some([c0, c1, c2]) => {
            let t = x - origin;
            c0 + c1 * t + c2 * t * t
        }
        None => linear(known[left], known[left + 1], x),
    }
}

/// Gaussian elimination with partial pivoting.
fn solve3(mut a: [[f64; 3]; 3], mut b: [f64; 3]) -> Option<[f64; 3]> {
    for col in 0..3 {
        let pivot = (col..3).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);
        for row in col + 1..3 {
            let factor = a[row][col] / a[col][col];
            for k in col..3 {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = [0.0; 3];
    for row in (0..3).rev() {
        let tail: f64 = (row + 1..3).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    x.iter().all(|v| v.is_finite()).then_some(x)
}

/// Natural cubic spline through every known point.
struct NaturalSpline {
    xs: Vec<f64>,
    ys: Vec<f64>,
    second: Vec<f64>,
}

impl NaturalSpline {
    fn fit(known: &[(usize, f64)]) -> Option<Self> {
        let xs: Vec<f64> = known.iter().map(|&(x, _)| x as f64).collect();
        let ys: Vec<f64> = known.iter().map(|&(_, y)| y).collect();
        let n = xs.len();
        if n < 3 {
            return None;
        }

        let h: Vec<f64> = xs.windows(2).map(|w| w[1] - w[0]).collect();
        let m = n - 2;
        let mut sub = vec![0.0; m];
        let mut diag = vec![0.0; m];
        let mut sup = vec![0.0; m];
        let mut rhs = vec![0.0; m];
        for i in 0..m {
            let k = i + 1;
            sub[i] = h[k - 1];
            diag[i] = 2.0 * (h[k - 1] + h[k]);
            sup[i] = h[k];
            rhs[i] = 6.0 * ((ys[k + 1] - ys[k]) / h[k] - (ys[k] - ys[k - 1]) / h[k - 1]);
        }

        let interior = thomas(&sub, &diag, &sup, &rhs)?;
        let mut second = Vec::with_capacity(n);
        second.push(0.0);
        second.extend(interior);
        second.push(0.0);

        Some(Self { xs, ys, second })
    }

    fn evaluate(&self, x: f64) -> f64 {
        let segment = match self.xs.partition_point(|&xi| xi <= x) {
            0 => 0,
            p => (p - 1).min(self.xs.len() - 2),
        };
        let (x0, x1) = (self.xs[segment], self.xs[segment + 1]);
        let (y0, y1) = (self.ys[segment], self.ys[segment + 1]);
        let (m0, m1) = (self.second[segment], self.second[segment + 1]);
        let h = x1 - x0;
        let (t, u) = (x - x0, x1 - x);

        m0 * u.powi(3) / (6.0 * h)
            + m1 * t.powi(3) / (6.0 * h)
            + (y0 / h - m0 * h / 6.0) * u
            + (y1 / h - m1 * h / 6.0) * t
    }
}

/// Tridiagonal solve; `sub[0]` and `sup[last]` are ignored.
fn thomas(sub: &[f64], diag: &[f64], sup: &[f64], rhs: &[f64]) -> Option<Vec<f64>> {
    let n = diag.len();
    let mut c = vec![0.0; n];
    let mut d = vec![0.0; n];

    for i in 0..n {
        let lower = if i == 0 { 0.0 } else { sub[i] };
        let prev_c = if i == 0 { 0.0 } else { c[i - 1] };
        let prev_d = if i == 0 { 0.0 } else { d[i - 1] };
        let denom = diag[i] - lower * prev_c;
        if denom.abs() < 1e-12 {
            return None;
        }
        c[i] = sup[i] / denom;
        d[i] = (rhs[i] - lower * prev_d) / denom;
    }

    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        x[i] = d[i] - if i + 1 < n { c[i] * x[i + 1] } else { 0.0 };
    }
    Some(x)
}
