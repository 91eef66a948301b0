//! Lasso
//!
//! Coordinate-descent L1 regression with sample weights, plus the
//! cross-validated variant that backs the `Auto` first-stage model.
use crate::data::RowMajorMatrix;
use crate::errors::OrthofitError;
use crate::folds::{build_folds, FoldSpec};
use crate::models::Regressor;
use crate::utils::{normalized_weights, weighted_column_means, weighted_mean};
use log::info;
use rayon::prelude::*;

const DEFAULT_MAX_ITER: usize = 1000;
const DEFAULT_TOL: f64 = 1e-4;
const DEFAULT_EPS: f64 = 1e-3;
const DEFAULT_N_ALPHAS: usize = 100;
const DEFAULT_CV_FOLDS: usize = 5;

fn soft_threshold(value: f64, threshold: f64) -> f64 {
    if value > threshold {
        value - threshold
    } else if value < -threshold {
        value + threshold
    } else {
        0.0
    }
}

/// A target column centered (together with the features) by weighted means,
/// so the intercept can be recovered after the penalized solve.
struct CenteredProblem {
    x: RowMajorMatrix,
    y: Vec<f64>,
    x_means: Vec<f64>,
    y_mean: f64,
}

fn center_problem(
    x: &RowMajorMatrix,
    y: &[f64],
    weights: Option<&[f64]>,
    fit_intercept: bool,
) -> CenteredProblem {
    if !fit_intercept {
        return CenteredProblem {
            x: x.clone(),
            y: y.to_vec(),
            x_means: vec![0.0; x.cols],
            y_mean: 0.0,
        };
    }
    let x_means = weighted_column_means(x, weights);
    let y_mean = weighted_mean(y, weights);
    let mut xc = x.clone();
    for i in 0..x.rows {
        for j in 0..x.cols {
            xc.set(i, j, x.get(i, j) - x_means[j]);
        }
    }
    let yc = y.iter().map(|v| v - y_mean).collect();
    CenteredProblem {
        x: xc,
        y: yc,
        x_means,
        y_mean,
    }
}

/// Cyclic coordinate descent on
/// `(1/2n) * sum_i w_i (y_i - x_i b)^2 + alpha * ||b||_1`.
///
/// `weights` must already be normalized to sum to n. Stops when the largest
/// coefficient update falls below `tol`.
fn coordinate_descent(
    x: &RowMajorMatrix,
    y: &[f64],
    weights: Option<&[f64]>,
    alpha: f64,
    max_iter: usize,
    tol: f64,
    warm_start: Option<Vec<f64>>,
) -> Vec<f64> {
    let n = x.rows as f64;
    let p = x.cols;
    let mut col_scale = vec![0.0; p];
    for i in 0..x.rows {
        let w = weights.map_or(1.0, |w| w[i]);
        for j in 0..p {
            let v = x.get(i, j);
            col_scale[j] += w * v * v;
        }
    }
    for scale in col_scale.iter_mut() {
        *scale /= n;
    }

    let mut beta = warm_start.unwrap_or_else(|| vec![0.0; p]);
    let mut residual: Vec<f64> = (0..x.rows)
        .map(|i| {
            let mut r = y[i];
            for j in 0..p {
                r -= x.get(i, j) * beta[j];
            }
            r
        })
        .collect();

    for _ in 0..max_iter {
        let mut max_delta = 0.0f64;
        for j in 0..p {
            if col_scale[j] == 0.0 {
                continue;
            }
            let mut rho = 0.0;
            for i in 0..x.rows {
                let w = weights.map_or(1.0, |w| w[i]);
                rho += w * x.get(i, j) * residual[i];
            }
            rho = rho / n + col_scale[j] * beta[j];
            let updated = soft_threshold(rho, alpha) / col_scale[j];
            let delta = updated - beta[j];
            if delta != 0.0 {
                for i in 0..x.rows {
                    residual[i] -= x.get(i, j) * delta;
                }
                beta[j] = updated;
            }
            max_delta = max_delta.max(delta.abs());
        }
        if max_delta < tol {
            break;
        }
    }
    beta
}

/// Descending geometric alpha grid from the data-derived maximum down to
/// `eps` times it.
fn alpha_grid(
    x_centered: &RowMajorMatrix,
    y_centered: &[f64],
    weights: Option<&[f64]>,
    eps: f64,
    n_alphas: usize,
) -> Vec<f64> {
    let n = x_centered.rows as f64;
    let mut alpha_max = 0.0f64;
    for j in 0..x_centered.cols {
        let mut dot = 0.0;
        for i in 0..x_centered.rows {
            let w = weights.map_or(1.0, |w| w[i]);
            dot += w * x_centered.get(i, j) * y_centered[i];
        }
        alpha_max = alpha_max.max((dot / n).abs());
    }
    let alpha_max = alpha_max.max(1e-12);
    let log_max = alpha_max.ln();
    let log_min = (alpha_max * eps).ln();
    (0..n_alphas)
        .map(|i| {
            let frac = if n_alphas > 1 {
                i as f64 / (n_alphas - 1) as f64
            } else {
                0.0
            };
            (log_max + frac * (log_min - log_max)).exp()
        })
        .collect()
}

/// Pick the alpha with the smallest weighted k-fold prediction error.
pub(crate) fn select_alpha(
    x: &RowMajorMatrix,
    y: &[f64],
    sample_weight: Option<&[f64]>,
    fit_intercept: bool,
    eps: f64,
    n_alphas: usize,
    n_folds: usize,
    seed: u64,
    max_iter: usize,
    tol: f64,
) -> Result<f64, OrthofitError> {
    let n = x.rows;
    if n < 2 {
        return Err(OrthofitError::Configuration(
            "cross-validated alpha selection needs at least two rows".to_string(),
        ));
    }
    let k = n_folds.min(n).max(2);

    let full_weights = sample_weight.map(|w| normalized_weights(w, n));
    let centered = center_problem(x, y, full_weights.as_deref(), fit_intercept);
    let grid = alpha_grid(
        &centered.x,
        &centered.y,
        full_weights.as_deref(),
        eps,
        n_alphas,
    );

    let folds = build_folds(&FoldSpec::KFolds(k), n, None, None, seed)?;
    let per_fold: Vec<Vec<f64>> = folds
        .par_iter()
        .map(|fold| {
            let x_train = x.take_rows(&fold.train);
            let y_train: Vec<f64> = fold.train.iter().map(|&i| y[i]).collect();
            let w_train = sample_weight
                .map(|w| normalized_weights(&fold.train.iter().map(|&i| w[i]).collect::<Vec<f64>>(), fold.train.len()));
            let centered = center_problem(&x_train, &y_train, w_train.as_deref(), fit_intercept);

            let mut errors = vec![0.0f64; grid.len()];
            let mut warm: Option<Vec<f64>> = None;
            for (a, &alpha) in grid.iter().enumerate() {
                let beta = coordinate_descent(
                    &centered.x,
                    &centered.y,
                    w_train.as_deref(),
                    alpha,
                    max_iter,
                    tol,
                    warm.clone(),
                );
                let intercept = centered.y_mean
                    - centered
                        .x_means
                        .iter()
                        .zip(&beta)
                        .map(|(m, b)| m * b)
                        .sum::<f64>();
                for &i in &fold.test {
                    let mut pred = intercept;
                    for j in 0..x.cols {
                        pred += x.get(i, j) * beta[j];
                    }
                    let w = sample_weight.map_or(1.0, |w| w[i]);
                    let diff = y[i] - pred;
                    errors[a] += w * diff * diff;
                }
                warm = Some(beta);
            }
            errors
        })
        .collect();

    let mut total = vec![0.0f64; grid.len()];
    for errors in &per_fold {
        for (t, e) in total.iter_mut().zip(errors) {
            *t += e;
        }
    }
    let best = total
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap_or(0);
    Ok(grid[best])
}

/// L1-penalized linear regression with sample weights.
///
/// Weights are normalized to sum to the number of rows before entering the
/// objective, so the penalty scale does not drift with the weight scale.
pub struct WeightedLasso {
    alpha: f64,
    fit_intercept: bool,
    max_iter: usize,
    tol: f64,
    coefficients: Option<RowMajorMatrix>,
    intercepts: Option<Vec<f64>>,
}

impl WeightedLasso {
    /// Create a new WeightedLasso.
    ///
    /// * `alpha` - L1 penalty strength.
    /// * `fit_intercept` - Whether to estimate an unpenalized intercept.
    pub fn new(alpha: f64, fit_intercept: bool) -> Result<Self, OrthofitError> {
        if !(alpha.is_finite() && alpha >= 0.0) {
            return Err(OrthofitError::InvalidParameter(
                "alpha".to_string(),
                "a non-negative number".to_string(),
                alpha.to_string(),
            ));
        }
        Ok(WeightedLasso {
            alpha,
            fit_intercept,
            max_iter: DEFAULT_MAX_ITER,
            tol: DEFAULT_TOL,
            coefficients: None,
            intercepts: None,
        })
    }
}

impl Regressor for WeightedLasso {
    fn fit(
        &mut self,
        x: &RowMajorMatrix,
        y: &RowMajorMatrix,
        sample_weight: Option<&[f64]>,
    ) -> Result<(), OrthofitError> {
        if y.rows != x.rows {
            return Err(OrthofitError::RowCountMismatch(
                "y".to_string(),
                y.rows,
                x.rows,
            ));
        }
        let weights = sample_weight.map(|w| normalized_weights(w, x.rows));
        let mut coefficients = RowMajorMatrix::zeros(x.cols, y.cols);
        let mut intercepts = vec![0.0; y.cols];
        for out in 0..y.cols {
            let target = y.column(out);
            let centered = center_problem(x, &target, weights.as_deref(), self.fit_intercept);
            let beta = coordinate_descent(
                &centered.x,
                &centered.y,
                weights.as_deref(),
                self.alpha,
                self.max_iter,
                self.tol,
                None,
            );
            intercepts[out] = centered.y_mean
                - centered
                    .x_means
                    .iter()
                    .zip(&beta)
                    .map(|(m, b)| m * b)
                    .sum::<f64>();
            for (j, b) in beta.iter().enumerate() {
                coefficients.set(j, out, *b);
            }
        }
        self.coefficients = Some(coefficients);
        self.intercepts = Some(intercepts);
        Ok(())
    }

    fn predict(&self, x: &RowMajorMatrix) -> Result<RowMajorMatrix, OrthofitError> {
        let coef = self
            .coefficients
            .as_ref()
            .ok_or_else(|| OrthofitError::NotFitted("predict".to_string()))?;
        let intercepts = self
            .intercepts
            .as_ref()
            .ok_or_else(|| OrthofitError::NotFitted("predict".to_string()))?;
        let mut out = RowMajorMatrix::zeros(x.rows, coef.cols);
        for i in 0..x.rows {
            for j in 0..coef.cols {
                let mut value = intercepts[j];
                for k in 0..coef.rows {
                    value += x.get(i, k) * coef.get(k, j);
                }
                out.set(i, j, value);
            }
        }
        Ok(out)
    }

    fn coefficients(&self) -> Option<&RowMajorMatrix> {
        self.coefficients.as_ref()
    }

    fn intercepts(&self) -> Option<&[f64]> {
        self.intercepts.as_deref()
    }
}

/// Weighted lasso with per-output cross-validated penalty selection.
pub struct WeightedLassoCv {
    fit_intercept: bool,
    seed: u64,
    eps: f64,
    n_alphas: usize,
    n_folds: usize,
    max_iter: usize,
    tol: f64,
    coefficients: Option<RowMajorMatrix>,
    intercepts: Option<Vec<f64>>,
    selected_alphas: Option<Vec<f64>>,
}

impl WeightedLassoCv {
    /// Create a new WeightedLassoCv.
    ///
    /// * `fit_intercept` - Whether to estimate an unpenalized intercept.
    /// * `seed` - Seed for the internal CV fold shuffle.
    pub fn new(fit_intercept: bool, seed: u64) -> Self {
        WeightedLassoCv {
            fit_intercept,
            seed,
            eps: DEFAULT_EPS,
            n_alphas: DEFAULT_N_ALPHAS,
            n_folds: DEFAULT_CV_FOLDS,
            max_iter: DEFAULT_MAX_ITER,
            tol: DEFAULT_TOL,
            coefficients: None,
            intercepts: None,
            selected_alphas: None,
        }
    }

    /// The alpha chosen for each output column, once fit.
    pub fn selected_alphas(&self) -> Option<&[f64]> {
        self.selected_alphas.as_deref()
    }
}

impl Regressor for WeightedLassoCv {
    fn fit(
        &mut self,
        x: &RowMajorMatrix,
        y: &RowMajorMatrix,
        sample_weight: Option<&[f64]>,
    ) -> Result<(), OrthofitError> {
        if y.rows != x.rows {
            return Err(OrthofitError::RowCountMismatch(
                "y".to_string(),
                y.rows,
                x.rows,
            ));
        }
        let mut coefficients = RowMajorMatrix::zeros(x.cols, y.cols);
        let mut intercepts = vec![0.0; y.cols];
        let mut alphas = vec![0.0; y.cols];
        for out in 0..y.cols {
            let target = y.column(out);
            let alpha = select_alpha(
                x,
                &target,
                sample_weight,
                self.fit_intercept,
                self.eps,
                self.n_alphas,
                self.n_folds,
                self.seed,
                self.max_iter,
                self.tol,
            )?;
            info!("selected lasso alpha {alpha:.6e} for output column {out}");
            let mut model = WeightedLasso::new(alpha, self.fit_intercept)?;
            model.fit(x, &RowMajorMatrix::from_vec(target), sample_weight)?;
            let coef = model
                .coefficients
                .as_ref()
                .ok_or_else(|| OrthofitError::NotFitted("fit".to_string()))?;
            for j in 0..x.cols {
                coefficients.set(j, out, coef.get(j, 0));
            }
            intercepts[out] = model.intercepts.as_ref().map_or(0.0, |b| b[0]);
            alphas[out] = alpha;
        }
        self.coefficients = Some(coefficients);
        self.intercepts = Some(intercepts);
        self.selected_alphas = Some(alphas);
        Ok(())
    }

    fn predict(&self, x: &RowMajorMatrix) -> Result<RowMajorMatrix, OrthofitError> {
        let coef = self
            .coefficients
            .as_ref()
            .ok_or_else(|| OrthofitError::NotFitted("predict".to_string()))?;
        let intercepts = self
            .intercepts
            .as_ref()
            .ok_or_else(|| OrthofitError::NotFitted("predict".to_string()))?;
        let mut out = RowMajorMatrix::zeros(x.rows, coef.cols);
        for i in 0..x.rows {
            for j in 0..coef.cols {
                let mut value = intercepts[j];
                for k in 0..coef.rows {
                    value += x.get(i, k) * coef.get(k, j);
                }
                out.set(i, j, value);
            }
        }
        Ok(out)
    }

    fn coefficients(&self) -> Option<&RowMajorMatrix> {
        self.coefficients.as_ref()
    }

    fn intercepts(&self) -> Option<&[f64]> {
        self.intercepts.as_deref()
    }
}
