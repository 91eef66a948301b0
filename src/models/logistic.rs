//! Logistic Regression
//!
//! The classifier behind discrete-treatment propensity estimation.
use crate::data::RowMajorMatrix;
use crate::errors::OrthofitError;
use crate::models::linear::{from_dmatrix, invert_gram, to_dmatrix};
use crate::models::Classifier;

const DEFAULT_L2: f64 = 1e-4;
const MAX_ITER: usize = 100;
const TOL: f64 = 1e-8;
const PROB_FLOOR: f64 = 1e-10;

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// One-vs-rest logistic regression fit by iteratively reweighted least
/// squares. A small L2 penalty on the non-intercept weights keeps the solve
/// well posed on separable data.
pub struct LogisticRegression {
    l2: f64,
    max_iter: usize,
    tol: f64,
    weights: Option<RowMajorMatrix>,
    n_classes: usize,
}

impl LogisticRegression {
    /// Create a new LogisticRegression.
    ///
    /// * `l2` - Ridge penalty applied to every weight except the intercept.
    pub fn new(l2: f64) -> Result<Self, OrthofitError> {
        if !(l2.is_finite() && l2 >= 0.0) {
            return Err(OrthofitError::InvalidParameter(
                "l2".to_string(),
                "a non-negative number".to_string(),
                l2.to_string(),
            ));
        }
        Ok(LogisticRegression {
            l2,
            max_iter: MAX_ITER,
            tol: TOL,
            weights: None,
            n_classes: 0,
        })
    }

    fn fit_one_class(
        &self,
        design: &RowMajorMatrix,
        targets: &[f64],
        sample_weight: Option<&[f64]>,
    ) -> Result<Vec<f64>, OrthofitError> {
        let n = design.rows;
        let p = design.cols;
        let mut beta = vec![0.0f64; p];
        for _ in 0..self.max_iter {
            let mut probs = vec![0.0f64; n];
            for i in 0..n {
                let mut eta = 0.0;
                for j in 0..p {
                    eta += design.get(i, j) * beta[j];
                }
                probs[i] = sigmoid(eta).clamp(PROB_FLOOR, 1.0 - PROB_FLOOR);
            }

            let mut gradient = vec![0.0f64; p];
            let mut hessian = RowMajorMatrix::zeros(p, p);
            for i in 0..n {
                let sw = sample_weight.map_or(1.0, |w| w[i]);
                let resid = sw * (targets[i] - probs[i]);
                let curvature = sw * probs[i] * (1.0 - probs[i]);
                for j in 0..p {
                    let xj = design.get(i, j);
                    gradient[j] += xj * resid;
                    for k in j..p {
                        let add = curvature * xj * design.get(i, k);
                        hessian.set(j, k, hessian.get(j, k) + add);
                    }
                }
            }
            for j in 0..p {
                for k in 0..j {
                    hessian.set(j, k, hessian.get(k, j));
                }
            }
            // Column 0 is the intercept and stays unpenalized.
            for j in 1..p {
                gradient[j] -= self.l2 * beta[j];
                hessian.set(j, j, hessian.get(j, j) + self.l2);
            }

            let inverse = invert_gram(to_dmatrix(&hessian))?;
            let inverse = from_dmatrix(&inverse);
            let mut max_step = 0.0f64;
            for j in 0..p {
                let mut step = 0.0;
                for k in 0..p {
                    step += inverse.get(j, k) * gradient[k];
                }
                beta[j] += step;
                max_step = max_step.max(step.abs());
            }
            if max_step < self.tol {
                break;
            }
        }
        Ok(beta)
    }
}

impl Default for LogisticRegression {
    /// A model with the default ridge penalty.
    fn default() -> Self {
        LogisticRegression {
            l2: DEFAULT_L2,
            max_iter: MAX_ITER,
            tol: TOL,
            weights: None,
            n_classes: 0,
        }
    }
}

impl Classifier for LogisticRegression {
    fn fit(
        &mut self,
        x: &RowMajorMatrix,
        labels: &[usize],
        n_classes: usize,
        sample_weight: Option<&[f64]>,
    ) -> Result<(), OrthofitError> {
        if n_classes < 2 {
            return Err(OrthofitError::InvalidParameter(
                "n_classes".to_string(),
                "at least 2".to_string(),
                n_classes.to_string(),
            ));
        }
        if labels.len() != x.rows {
            return Err(OrthofitError::RowCountMismatch(
                "labels".to_string(),
                labels.len(),
                x.rows,
            ));
        }
        if let Some(bad) = labels.iter().find(|&&label| label >= n_classes) {
            return Err(OrthofitError::Configuration(format!(
                "label {bad} is outside the declared {n_classes} classes"
            )));
        }

        let mut design = RowMajorMatrix::ones(x.rows, x.cols + 1);
        for i in 0..x.rows {
            for j in 0..x.cols {
                design.set(i, j + 1, x.get(i, j));
            }
        }

        let mut weights = RowMajorMatrix::zeros(design.cols, n_classes);
        for class in 0..n_classes {
            let targets: Vec<f64> = labels
                .iter()
                .map(|&label| if label == class { 1.0 } else { 0.0 })
                .collect();
            let beta = self.fit_one_class(&design, &targets, sample_weight)?;
            for (j, b) in beta.iter().enumerate() {
                weights.set(j, class, *b);
            }
        }
        self.weights = Some(weights);
        self.n_classes = n_classes;
        Ok(())
    }

    fn predict_proba(&self, x: &RowMajorMatrix) -> Result<RowMajorMatrix, OrthofitError> {
        let weights = self
            .weights
            .as_ref()
            .ok_or_else(|| OrthofitError::NotFitted("predict_proba".to_string()))?;
        if x.cols + 1 != weights.rows {
            return Err(OrthofitError::Configuration(format!(
                "expected {} feature columns but received {}",
                weights.rows - 1,
                x.cols
            )));
        }
        let mut out = RowMajorMatrix::zeros(x.rows, self.n_classes);
        for i in 0..x.rows {
            let mut total = 0.0;
            for class in 0..self.n_classes {
                let mut eta = weights.get(0, class);
                for j in 0..x.cols {
                    eta += x.get(i, j) * weights.get(j + 1, class);
                }
                let score = sigmoid(eta);
                out.set(i, class, score);
                total += score;
            }
            if total > 0.0 {
                for class in 0..self.n_classes {
                    out.set(i, class, out.get(i, class) / total);
                }
            } else {
                for class in 0..self.n_classes {
                    out.set(i, class, 1.0 / self.n_classes as f64);
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_boundary() {
        let x = RowMajorMatrix::from_vec(vec![-3.0, -2.0, -1.0, 1.0, 2.0, 3.0]);
        let labels = vec![0, 0, 0, 1, 1, 1];
        let mut model = LogisticRegression::new(1e-4).unwrap();
        model.fit(&x, &labels, 2, None).unwrap();
        let probs = model.predict_proba(&x).unwrap();
        for i in 0..3 {
            assert!(probs.get(i, 0) > 0.9, "row {i} should favor class 0");
        }
        for i in 3..6 {
            assert!(probs.get(i, 1) > 0.9, "row {i} should favor class 1");
        }
    }

    #[test]
    fn test_rows_sum_to_one() {
        let x = RowMajorMatrix::new(
            vec![0.0, 0.1, 1.0, -0.2, 2.0, 0.4, 0.5, 0.9, 1.5, -1.0, 2.5, 0.3],
            6,
            2,
        );
        let labels = vec![0, 1, 2, 0, 1, 2];
        let mut model = LogisticRegression::new(0.1).unwrap();
        model.fit(&x, &labels, 3, None).unwrap();
        let probs = model.predict_proba(&x).unwrap();
        for i in 0..6 {
            let total: f64 = (0..3).map(|c| probs.get(i, c)).sum();
            assert!((total - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_sample_weight_shifts_probability() {
        let x = RowMajorMatrix::from_vec(vec![-1.0, -0.5, 0.0, 0.5, 1.0, 0.0]);
        let labels = vec![0, 0, 0, 1, 1, 1];
        let mut plain = LogisticRegression::new(0.01).unwrap();
        plain.fit(&x, &labels, 2, None).unwrap();
        let mut weighted = LogisticRegression::new(0.01).unwrap();
        let w = vec![1.0, 1.0, 1.0, 5.0, 5.0, 5.0];
        weighted.fit(&x, &labels, 2, Some(&w)).unwrap();

        let query = RowMajorMatrix::from_vec(vec![0.0]);
        let base = plain.predict_proba(&query).unwrap().get(0, 1);
        let boosted = weighted.predict_proba(&query).unwrap().get(0, 1);
        assert!(boosted > base, "upweighting class 1 should raise its probability");
    }

    #[test]
    fn test_label_out_of_range() {
        let x = RowMajorMatrix::from_vec(vec![0.0, 1.0]);
        let labels = vec![0, 2];
        let mut model = LogisticRegression::new(1e-4).unwrap();
        assert!(model.fit(&x, &labels, 2, None).is_err());
    }

    #[test]
    fn test_single_class_rejected() {
        let x = RowMajorMatrix::from_vec(vec![0.0, 1.0]);
        let mut model = LogisticRegression::new(1e-4).unwrap();
        assert!(model.fit(&x, &[0, 0], 1, None).is_err());
    }

    #[test]
    fn test_predict_before_fit() {
        let model = LogisticRegression::new(1e-4).unwrap();
        let x = RowMajorMatrix::from_vec(vec![0.0]);
        assert!(matches!(
            model.predict_proba(&x),
            Err(OrthofitError::NotFitted(_))
        ));
    }
}
