//! Models
//!
//! Built-in regressors and classifiers, and the traits through which user
//! models plug into the first and final stages.
pub mod debiased;
pub mod lasso;
pub mod linear;
pub mod logistic;

use crate::data::RowMajorMatrix;
use crate::errors::OrthofitError;

/// A regression model with a conventional fit/predict surface.
///
/// Targets are `(n, d)` matrices; single-target models receive one column.
/// The coefficient accessors are optional capabilities: linear models report
/// their fitted structure for downstream interval construction, others
/// return `None` and consumers fail explicitly instead of guessing.
pub trait Regressor: Send + Sync {
    /// Fit the model.
    ///
    /// * `x` - Feature matrix, `(n, p)`.
    /// * `y` - Target matrix, `(n, d)`.
    /// * `sample_weight` - Optional per-row weights.
    fn fit(
        &mut self,
        x: &RowMajorMatrix,
        y: &RowMajorMatrix,
        sample_weight: Option<&[f64]>,
    ) -> Result<(), OrthofitError>;

    /// Predict targets for new rows, `(n, d)`.
    fn predict(&self, x: &RowMajorMatrix) -> Result<RowMajorMatrix, OrthofitError>;

    /// Fitted coefficients as a `(p, d)` matrix, when the model is linear.
    fn coefficients(&self) -> Option<&RowMajorMatrix> {
        None
    }

    /// Fitted intercepts, one per output, when the model is linear.
    fn intercepts(&self) -> Option<&[f64]> {
        None
    }

    /// Coefficient covariance per output, `(p, p)` each, when available.
    fn coefficient_covariance(&self) -> Option<&[RowMajorMatrix]> {
        None
    }
}

/// A classification model exposing class probabilities.
pub trait Classifier: Send + Sync {
    /// Fit the model.
    ///
    /// * `x` - Feature matrix, `(n, p)`.
    /// * `labels` - Class index per row, each `< n_classes`.
    /// * `n_classes` - Total classes, including those absent from `labels`.
    /// * `sample_weight` - Optional per-row weights.
    fn fit(
        &mut self,
        x: &RowMajorMatrix,
        labels: &[usize],
        n_classes: usize,
        sample_weight: Option<&[f64]>,
    ) -> Result<(), OrthofitError>;

    /// Class probabilities for new rows, `(n, n_classes)`, rows summing to 1.
    fn predict_proba(&self, x: &RowMajorMatrix) -> Result<RowMajorMatrix, OrthofitError>;
}

/// Builder invoked once per fold (or per fit) for a fresh regressor.
pub type RegressorFactory = Box<dyn Fn() -> Box<dyn Regressor> + Send + Sync>;

/// Builder invoked once per fold (or per fit) for a fresh classifier.
pub type ClassifierFactory = Box<dyn Fn() -> Box<dyn Classifier> + Send + Sync>;
