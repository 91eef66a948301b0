//! Utils
//!
//! Array helpers shared by the fold splitter, wrappers and model zoo.
use crate::data::RowMajorMatrix;

/// Concatenate two matrices side by side.
pub fn hstack(a: &RowMajorMatrix, b: &RowMajorMatrix) -> RowMajorMatrix {
    debug_assert_eq!(a.rows, b.rows);
    let cols = a.cols + b.cols;
    let mut data = Vec::with_capacity(a.rows * cols);
    for i in 0..a.rows {
        data.extend_from_slice(a.row(i));
        data.extend_from_slice(b.row(i));
    }
    RowMajorMatrix::new(data, a.rows, cols)
}

/// Concatenate two optional matrices side by side, treating a missing side as
/// zero columns.
pub fn hstack_opt(a: Option<&RowMajorMatrix>, b: Option<&RowMajorMatrix>) -> Option<RowMajorMatrix> {
    match (a, b) {
        (Some(a), Some(b)) => Some(hstack(a, b)),
        (Some(a), None) => Some(a.clone()),
        (None, Some(b)) => Some(b.clone()),
        (None, None) => None,
    }
}

/// Row-wise Khatri-Rao product of two matrices.
///
/// Output column `j2 * d1 + j1` holds `x1[:, j1] * x2[:, j2]`, so the columns
/// of `x1` vary fastest. Effect queries and the final-stage design matrix rely
/// on this ordering.
pub fn cross_product(x1: &RowMajorMatrix, x2: &RowMajorMatrix) -> RowMajorMatrix {
    debug_assert_eq!(x1.rows, x2.rows);
    let (d1, d2) = (x1.cols, x2.cols);
    let mut out = RowMajorMatrix::zeros(x1.rows, d1 * d2);
    for i in 0..x1.rows {
        for j2 in 0..d2 {
            let v2 = x2.get(i, j2);
            for j1 in 0..d1 {
                out.set(i, j2 * d1 + j1, x1.get(i, j1) * v2);
            }
        }
    }
    out
}

/// Repeat a single-row matrix `n` times.
pub fn tile_rows(row: &RowMajorMatrix, n: usize) -> RowMajorMatrix {
    debug_assert_eq!(row.rows, 1);
    let mut data = Vec::with_capacity(n * row.cols);
    for _ in 0..n {
        data.extend_from_slice(row.row(0));
    }
    RowMajorMatrix::new(data, n, row.cols)
}

/// Mean of `values`, weighted when weights are present.
pub fn weighted_mean(values: &[f64], weights: Option<&[f64]>) -> f64 {
    match weights {
        Some(w) => {
            let total: f64 = w.iter().sum();
            if total == 0.0 {
                return 0.0;
            }
            values.iter().zip(w).map(|(v, wi)| v * wi).sum::<f64>() / total
        }
        None => {
            if values.is_empty() {
                0.0
            } else {
                values.iter().sum::<f64>() / values.len() as f64
            }
        }
    }
}

/// Per-column weighted means of a matrix.
pub fn weighted_column_means(m: &RowMajorMatrix, weights: Option<&[f64]>) -> Vec<f64> {
    let mut means = vec![0.0; m.cols];
    let mut total = 0.0;
    for i in 0..m.rows {
        let w = weights.map_or(1.0, |w| w[i]);
        total += w;
        for (j, mean) in means.iter_mut().enumerate() {
            *mean += w * m.get(i, j);
        }
    }
    if total > 0.0 {
        for mean in means.iter_mut() {
            *mean /= total;
        }
    }
    means
}

/// Rescale weights so that they sum to the number of samples.
pub fn normalized_weights(weights: &[f64], n: usize) -> Vec<f64> {
    let total: f64 = weights.iter().sum();
    if total == 0.0 {
        return vec![0.0; weights.len()];
    }
    let scale = n as f64 / total;
    weights.iter().map(|w| w * scale).collect()
}

/// Inverse of the standard normal CDF (probit function).
///
/// Rational approximation by Peter Acklam (relative error < 1.15e-9).
pub fn normal_quantile(p: f64) -> f64 {
    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    const A: [f64; 6] = [
        -3.969683028665376e+01,
        2.209460984245205e+02,
        -2.759285104469687e+02,
        1.383577518672690e+02,
        -3.066479806614716e+01,
        2.506628277459239e+00,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e+01,
        1.615858368580409e+02,
        -1.556989798598866e+02,
        6.680131188771972e+01,
        -1.328068155288572e+01,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-03,
        -3.223964580411365e-01,
        -2.400758277161838e+00,
        -2.549732539343734e+00,
        4.374664141464968e+00,
        2.938163982698783e+00,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-03,
        3.224671290700398e-01,
        2.445134137142996e+00,
        3.754408661907416e+00,
    ];

    const P_LOW: f64 = 0.02425;
    const P_HIGH: f64 = 1.0 - P_LOW;

    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= P_HIGH {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = (-2.0 * (1.0 - p).ln()).sqrt();
        -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    }
}
