//! Final Stage
//!
//! The residual-on-residual regression wrappers. `LinearFinalStage` crosses
//! the (featurized, optionally intercept-augmented) features with the
//! treatment residuals and fits a linear model on the product basis.
//! `WeightedFinalStage` instead reduces the effect regression to a weighted
//! problem so arbitrary nonlinear regressors can serve as the final model.
use log::warn;

use crate::data::{EffectTensor, RowMajorMatrix};
use crate::errors::OrthofitError;
use crate::featurize::Featurizer;
use crate::models::Regressor;
use crate::utils::{cross_product, hstack};

/// The heterogeneous effect function fit on residualized data.
pub trait EffectModel: Send {
    /// Fit on features and out-of-fold residuals.
    fn fit(
        &mut self,
        x: Option<&RowMajorMatrix>,
        t_res: &RowMajorMatrix,
        y_res: &RowMajorMatrix,
        sample_weight: Option<&[f64]>,
        sample_var: Option<&[f64]>,
    ) -> Result<(), OrthofitError>;

    /// Per-treatment effects at the given features, `(n or 1, d_y, d_t)`.
    fn predict(&self, x: Option<&RowMajorMatrix>) -> Result<EffectTensor, OrthofitError>;

    /// The fitted inner regressor, for coefficient introspection.
    fn fitted_regressor(&self) -> Option<&dyn Regressor> {
        None
    }

    /// Effect feature names, delegating to the featurizer's naming
    /// capability when one is attached.
    fn feature_names(&self, input_names: &[String]) -> Option<Vec<String>> {
        let _ = input_names;
        None
    }
}

/// Builds a fresh effect model for the final stage.
pub type EffectModelFactory = Box<dyn Fn() -> Box<dyn EffectModel> + Send + Sync>;

/// Default final stage: regress outcome residuals on the cross product of
/// effect features and treatment residuals with a linear model.
pub struct LinearFinalStage {
    model: Box<dyn Regressor>,
    featurizer: Option<Box<dyn Featurizer>>,
    fit_cate_intercept: bool,
    phantom_intercept: Option<Vec<f64>>,
    fitted_with_x: bool,
    d_t: usize,
    d_y: usize,
    fitted: bool,
}

impl LinearFinalStage {
    /// Create a new LinearFinalStage.
    ///
    /// * `model` - The linear model fit on the product basis. It is expected
    ///   to fit without its own intercept; one that adds one anyway is
    ///   detected and corrected after fitting.
    /// * `featurizer` - Optional transform applied to X before crossing.
    /// * `fit_cate_intercept` - Prepend a constant column to the effect
    ///   features.
    pub fn new(
        model: Box<dyn Regressor>,
        featurizer: Option<Box<dyn Featurizer>>,
        fit_cate_intercept: bool,
    ) -> Self {
        LinearFinalStage {
            model,
            featurizer,
            fit_cate_intercept,
            phantom_intercept: None,
            fitted_with_x: false,
            d_t: 0,
            d_y: 0,
            fitted: false,
        }
    }

    fn check_identifiable(&self, x: Option<&RowMajorMatrix>) -> Result<(), OrthofitError> {
        if x.is_none() && !self.fit_cate_intercept {
            return Err(OrthofitError::Configuration(
                "X is absent and no intercept is requested; the effect has nothing to regress on"
                    .to_string(),
            ));
        }
        Ok(())
    }

    fn with_intercept(&self, feats: RowMajorMatrix) -> RowMajorMatrix {
        if self.fit_cate_intercept {
            hstack(&RowMajorMatrix::ones(feats.rows, 1), &feats)
        } else {
            feats
        }
    }

    /// Effect features for fitting; fits the featurizer as a side effect.
    fn training_features(
        &mut self,
        x: Option<&RowMajorMatrix>,
        n_rows: usize,
    ) -> Result<RowMajorMatrix, OrthofitError> {
        self.check_identifiable(x)?;
        let feats = match x {
            Some(x) => match self.featurizer.as_mut() {
                Some(featurizer) => {
                    featurizer.fit(x)?;
                    featurizer.transform(x)?
                }
                None => x.clone(),
            },
            // The constant column is the intercept itself here.
            None => return Ok(RowMajorMatrix::ones(n_rows, 1)),
        };
        Ok(self.with_intercept(feats))
    }

    /// Effect features for prediction; reuses the fitted featurizer.
    fn inference_features(
        &self,
        x: Option<&RowMajorMatrix>,
        n_rows: usize,
    ) -> Result<RowMajorMatrix, OrthofitError> {
        let feats = match x {
            Some(x) => match self.featurizer.as_ref() {
                Some(featurizer) => featurizer.transform(x)?,
                None => x.clone(),
            },
            None => return Ok(RowMajorMatrix::ones(n_rows, 1)),
        };
        Ok(self.with_intercept(feats))
    }
}

impl EffectModel for LinearFinalStage {
    fn fit(
        &mut self,
        x: Option<&RowMajorMatrix>,
        t_res: &RowMajorMatrix,
        y_res: &RowMajorMatrix,
        sample_weight: Option<&[f64]>,
        sample_var: Option<&[f64]>,
    ) -> Result<(), OrthofitError> {
        if sample_var.is_some() {
            return Err(OrthofitError::MissingCapability(
                "per-sample variances require a variance-aware final model".to_string(),
            ));
        }
        let fts = self.training_features(x, t_res.rows)?;
        let design = cross_product(&fts, t_res);
        self.model.fit(&design, y_res, sample_weight)?;
        self.d_t = t_res.cols;
        self.d_y = y_res.cols;
        self.fitted_with_x = x.is_some();
        self.fitted = true;

        // Some models quietly add an intercept even when asked not to; probe
        // an all-zero design row and subtract whatever comes back.
        self.phantom_intercept = None;
        let probe = self
            .model
            .predict(&RowMajorMatrix::zeros(1, design.cols))?;
        if probe.data.iter().any(|v| *v != 0.0) {
            warn!(
                "the final model has a nonzero intercept for at least one outcome; \
                 it will be subtracted, but consider a model without an intercept"
            );
            self.phantom_intercept = Some(probe.data);
        }
        Ok(())
    }

    fn predict(&self, x: Option<&RowMajorMatrix>) -> Result<EffectTensor, OrthofitError> {
        if !self.fitted {
            return Err(OrthofitError::NotFitted("predict".to_string()));
        }
        if x.is_some() != self.fitted_with_x {
            return Err(OrthofitError::Configuration(
                "X must be provided exactly when the final stage was fitted with X".to_string(),
            ));
        }
        let n = x.map_or(1, |m| m.rows);
        let fts = self.inference_features(x, n)?;
        let p = fts.cols;

        // One design row per (row, unit treatment) pair.
        let mut design = RowMajorMatrix::zeros(n * self.d_t, p * self.d_t);
        for i in 0..n {
            for k in 0..self.d_t {
                let row = i * self.d_t + k;
                for j in 0..p {
                    design.set(row, k * p + j, fts.get(i, j));
                }
            }
        }
        let raw = self.model.predict(&design)?;
        let mut out = EffectTensor::zeros(n, self.d_y, self.d_t);
        for i in 0..n {
            for k in 0..self.d_t {
                for j in 0..self.d_y {
                    let mut value = raw.get(i * self.d_t + k, j);
                    if let Some(phantom) = &self.phantom_intercept {
                        value -= phantom[j];
                    }
                    out.set(i, j, k, value);
                }
            }
        }
        Ok(out)
    }

    fn fitted_regressor(&self) -> Option<&dyn Regressor> {
        Some(self.model.as_ref())
    }

    fn feature_names(&self, input_names: &[String]) -> Option<Vec<String>> {
        match &self.featurizer {
            Some(featurizer) => featurizer.feature_names(input_names),
            None => Some(input_names.to_vec()),
        }
    }
}

/// Final stage for arbitrary regressors via the reweighting reduction.
///
/// The residual equation `y_res = theta(X) * t_res` is rewritten as a
/// regression of `y_res / t_res` on X with per-sample weight `t_res^2`, which
/// any weighted regressor can fit. Treatment residuals near zero are clamped
/// away from it before dividing; the clamp trades a little bias for bounded
/// variance.
pub struct WeightedFinalStage {
    model: Box<dyn Regressor>,
    featurizer: Option<Box<dyn Featurizer>>,
    res_clip: f64,
    fitted: bool,
}

impl WeightedFinalStage {
    /// Create a new WeightedFinalStage.
    ///
    /// * `model` - Any weighted regressor; it models the effect directly.
    /// * `featurizer` - Optional transform applied to X.
    /// * `res_clip` - Minimum magnitude for the treatment residual
    ///   denominator.
    pub fn new(
        model: Box<dyn Regressor>,
        featurizer: Option<Box<dyn Featurizer>>,
        res_clip: f64,
    ) -> Result<Self, OrthofitError> {
        if !(res_clip.is_finite() && res_clip > 0.0) {
            return Err(OrthofitError::InvalidParameter(
                "res_clip".to_string(),
                "a positive number".to_string(),
                res_clip.to_string(),
            ));
        }
        Ok(WeightedFinalStage {
            model,
            featurizer,
            res_clip,
            fitted: false,
        })
    }

    fn features(
        &mut self,
        x: &RowMajorMatrix,
        fitting: bool,
    ) -> Result<RowMajorMatrix, OrthofitError> {
        match self.featurizer.as_mut() {
            Some(featurizer) => {
                if fitting {
                    featurizer.fit(x)?;
                }
                featurizer.transform(x)
            }
            None => Ok(x.clone()),
        }
    }
}

impl EffectModel for WeightedFinalStage {
    fn fit(
        &mut self,
        x: Option<&RowMajorMatrix>,
        t_res: &RowMajorMatrix,
        y_res: &RowMajorMatrix,
        sample_weight: Option<&[f64]>,
        sample_var: Option<&[f64]>,
    ) -> Result<(), OrthofitError> {
        let x = x.ok_or_else(|| {
            OrthofitError::Configuration(
                "the reweighting reduction requires X; without features there is no \
                 heterogeneity to model"
                    .to_string(),
            )
        })?;
        if t_res.cols != 1 || y_res.cols != 1 {
            return Err(OrthofitError::Configuration(format!(
                "the reweighting reduction needs a single treatment and outcome column, \
                 received {} and {}",
                t_res.cols, y_res.cols
            )));
        }
        if sample_var.is_some() {
            return Err(OrthofitError::MissingCapability(
                "per-sample variances require a variance-aware final model".to_string(),
            ));
        }

        let fts = self.features(x, true)?;
        let n = t_res.rows;
        let mut target = RowMajorMatrix::zeros(n, 1);
        let mut weights = vec![0.0f64; n];
        for i in 0..n {
            let t = t_res.get(i, 0);
            let sign = if t < 0.0 { -1.0 } else { 1.0 };
            let clipped = sign * t.abs().max(self.res_clip);
            target.set(i, 0, y_res.get(i, 0) / clipped);
            weights[i] = t * t * sample_weight.map_or(1.0, |w| w[i]);
        }
        self.model.fit(&fts, &target, Some(&weights))?;
        self.fitted = true;
        Ok(())
    }

    fn predict(&self, x: Option<&RowMajorMatrix>) -> Result<EffectTensor, OrthofitError> {
        if !self.fitted {
            return Err(OrthofitError::NotFitted("predict".to_string()));
        }
        let x = x.ok_or_else(|| {
            OrthofitError::Configuration(
                "the reweighting reduction requires X at prediction time".to_string(),
            )
        })?;
        let fts = match self.featurizer.as_ref() {
            Some(featurizer) => featurizer.transform(x)?,
            None => x.clone(),
        };
        let preds = self.model.predict(&fts)?;
        Ok(EffectTensor::new(preds.data, x.rows, 1, 1))
    }

    fn fitted_regressor(&self) -> Option<&dyn Regressor> {
        Some(self.model.as_ref())
    }

    fn feature_names(&self, input_names: &[String]) -> Option<Vec<String>> {
        match &self.featurizer {
            Some(featurizer) => featurizer.feature_names(input_names),
            None => Some(input_names.to_vec()),
        }
    }
}
