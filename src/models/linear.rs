//! Linear
//!
//! Ordinary and weighted least squares with coefficient covariance, used as
//! the default linear final model and as a building block in tests.
use crate::data::RowMajorMatrix;
use crate::errors::OrthofitError;
use crate::models::Regressor;
use crate::utils::{normal_quantile, normalized_weights};
use nalgebra::DMatrix;

pub(crate) fn to_dmatrix(m: &RowMajorMatrix) -> DMatrix<f64> {
    DMatrix::from_row_slice(m.rows, m.cols, &m.data)
}

pub(crate) fn from_dmatrix(m: &DMatrix<f64>) -> RowMajorMatrix {
    let mut out = RowMajorMatrix::zeros(m.nrows(), m.ncols());
    for i in 0..m.nrows() {
        for j in 0..m.ncols() {
            out.set(i, j, m[(i, j)]);
        }
    }
    out
}

/// Invert a symmetric positive semi-definite matrix via its SVD
/// pseudo-inverse, dropping singular values below a relative cutoff.
///
/// Collinear design columns (duplicated features, an explicit ones column
/// next to a constant feature) are expected inputs here, so a plain Cholesky
/// solve is not an option.
pub(crate) fn invert_gram(gram: DMatrix<f64>) -> Result<DMatrix<f64>, OrthofitError> {
    let svd = gram.svd(true, true);
    let largest = svd.singular_values.iter().cloned().fold(0.0f64, f64::max);
    let eps = (largest * 1e-13).max(f64::MIN_POSITIVE);
    svd.pseudo_inverse(eps)
        .map_err(|e| OrthofitError::Computation(format!("gram matrix inversion: {e}")))
}

/// Linear regression fit by (weighted) least squares.
///
/// Supports multi-column targets; coefficient covariance is homoskedastic,
/// one `(p, p)` block per output column.
pub struct LinearRegression {
    fit_intercept: bool,
    coefficients: Option<RowMajorMatrix>,
    intercepts: Option<Vec<f64>>,
    covariance: Option<Vec<RowMajorMatrix>>,
    std_errors: Option<RowMajorMatrix>,
}

impl LinearRegression {
    /// Create a new LinearRegression.
    ///
    /// * `fit_intercept` - Whether to estimate an intercept per output.
    pub fn new(fit_intercept: bool) -> Self {
        LinearRegression {
            fit_intercept,
            coefficients: None,
            intercepts: None,
            covariance: None,
            std_errors: None,
        }
    }

    /// Standard errors of the coefficients, `(p, d)`.
    pub fn std_errors(&self) -> Option<&RowMajorMatrix> {
        self.std_errors.as_ref()
    }

    /// Two-sided confidence bounds for the coefficients at total tail mass
    /// `alpha`, as `(lower, upper)` matrices shaped `(p, d)`.
    pub fn coef_interval(
        &self,
        alpha: f64,
    ) -> Result<(RowMajorMatrix, RowMajorMatrix), OrthofitError> {
        let coef = self
            .coefficients
            .as_ref()
            .ok_or_else(|| OrthofitError::NotFitted("coef_interval".to_string()))?;
        let se = self
            .std_errors
            .as_ref()
            .ok_or_else(|| OrthofitError::NotFitted("coef_interval".to_string()))?;
        let q = normal_quantile(1.0 - alpha / 2.0);
        let mut lower = coef.clone();
        let mut upper = coef.clone();
        for i in 0..coef.rows {
            for j in 0..coef.cols {
                lower.set(i, j, coef.get(i, j) - q * se.get(i, j));
                upper.set(i, j, coef.get(i, j) + q * se.get(i, j));
            }
        }
        Ok((lower, upper))
    }
}

impl Regressor for LinearRegression {
    fn fit(
        &mut self,
        x: &RowMajorMatrix,
        y: &RowMajorMatrix,
        sample_weight: Option<&[f64]>,
    ) -> Result<(), OrthofitError> {
        let n = x.rows;
        if y.rows != n {
            return Err(OrthofitError::RowCountMismatch("y".to_string(), y.rows, n));
        }
        if n == 0 {
            return Err(OrthofitError::Configuration(
                "cannot fit a regression on zero rows".to_string(),
            ));
        }
        let weights = sample_weight.map(|w| normalized_weights(w, n));

        // Optionally augment with a leading ones column for the intercept.
        let p = x.cols;
        let p_aug = p + usize::from(self.fit_intercept);
        let mut design = DMatrix::zeros(n, p_aug);
        for i in 0..n {
            if self.fit_intercept {
                design[(i, 0)] = 1.0;
            }
            for j in 0..p {
                design[(i, p_aug - p + j)] = x.get(i, j);
            }
        }
        let y_mat = to_dmatrix(y);

        // X' W X and X' W y, with W the diagonal of normalized weights.
        let mut weighted = design.clone();
        if let Some(w) = &weights {
            for i in 0..n {
                for j in 0..p_aug {
                    weighted[(i, j)] *= w[i];
                }
            }
        }
        let gram = design.transpose() * &weighted;
        let moment = weighted.transpose() * &y_mat;
        let gram_inv = invert_gram(gram)?;
        let beta = &gram_inv * &moment;

        let residuals = &y_mat - &design * &beta;
        let d_out = y.cols;
        let mut coefficients = RowMajorMatrix::zeros(p, d_out);
        let mut intercepts = vec![0.0; d_out];
        let mut std_errors = RowMajorMatrix::zeros(p, d_out);
        let mut covariance = Vec::with_capacity(d_out);
        let dof = (n as f64 - p_aug as f64).max(1.0);
        let offset = p_aug - p;
        for j in 0..d_out {
            let mut rss = 0.0;
            for i in 0..n {
                let w = weights.as_ref().map_or(1.0, |w| w[i]);
                rss += w * residuals[(i, j)] * residuals[(i, j)];
            }
            let sigma2 = rss / dof;
            if self.fit_intercept {
                intercepts[j] = beta[(0, j)];
            }
            let mut cov = RowMajorMatrix::zeros(p, p);
            for a in 0..p {
                coefficients.set(a, j, beta[(offset + a, j)]);
                for b in 0..p {
                    cov.set(a, b, sigma2 * gram_inv[(offset + a, offset + b)]);
                }
                std_errors.set(a, j, cov.get(a, a).max(0.0).sqrt());
            }
            covariance.push(cov);
        }

        self.coefficients = Some(coefficients);
        self.intercepts = Some(intercepts);
        self.covariance = Some(covariance);
        self.std_errors = Some(std_errors);
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
        if x.cols != coef.rows {
            return Err(OrthofitError::Configuration(format!(
                "model was fit on {} features but asked to predict on {}",
                coef.rows, x.cols
            )));
        }
        let mut out = RowMajorMatrix::zeros(x.rows, coef.cols);
        for i in 0..x.rows {
            let row = x.row(i);
            for j in 0..coef.cols {
                let mut value = intercepts[j];
                for (k, &v) in row.iter().enumerate() {
                    value += v * coef.get(k, j);
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

    fn coefficient_covariance(&self) -> Option<&[RowMajorMatrix]> {
        self.covariance.as_deref()
    }
}
