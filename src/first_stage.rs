//! First Stage
//!
//! Adapts a user-supplied regressor or classifier to the uniform
//! `fit(X, W, target)` / `predict(X, W)` contract the cross-fitting executor
//! expects. Handles the feature fallbacks when X or W are absent, the linear
//! basis expansion for outcome models, and one-hot decoding for discrete
//! treatment targets.
use crate::data::RowMajorMatrix;
use crate::encode::inverse_onehot;
use crate::errors::OrthofitError;
use crate::featurize::Featurizer;
use crate::models::{Classifier, Regressor};
use crate::utils::{cross_product, hstack, hstack_opt};

/// The wrapped estimator, either a regressor for continuous targets or a
/// classifier for a one-hot encoded discrete treatment.
pub enum FirstStageModel {
    Regress(Box<dyn Regressor>),
    Classify(Box<dyn Classifier>),
}

/// A nuisance model for one of the outcome or treatment equations.
pub struct FirstStage {
    model: FirstStageModel,
    is_outcome: bool,
    featurizer: Option<Box<dyn Featurizer>>,
    linear_first_stages: bool,
    n_categories: usize,
}

fn base_features(
    x: Option<&RowMajorMatrix>,
    w: Option<&RowMajorMatrix>,
    n_rows: usize,
) -> RowMajorMatrix {
    // With neither X nor W the model sees a constant column and predicts an
    // aggregate.
    hstack_opt(x, w).unwrap_or_else(|| RowMajorMatrix::ones(n_rows, 1))
}

impl FirstStage {
    /// Create a new FirstStage.
    ///
    /// * `model` - The wrapped regressor or classifier.
    /// * `is_outcome` - Whether this stage predicts the outcome rather than
    ///   the treatment.
    /// * `featurizer` - Optional transform applied to X inside the linear
    ///   basis expansion.
    /// * `linear_first_stages` - Expand outcome-model features so a plain
    ///   linear regressor can fit interactions with the featurized X.
    pub fn new(
        model: FirstStageModel,
        is_outcome: bool,
        featurizer: Option<Box<dyn Featurizer>>,
        linear_first_stages: bool,
    ) -> Self {
        FirstStage {
            model,
            is_outcome,
            featurizer,
            linear_first_stages,
            n_categories: 0,
        }
    }

    fn expands(&self, x: Option<&RowMajorMatrix>) -> bool {
        self.is_outcome && self.linear_first_stages && x.is_some()
    }

    fn expand(xw: &RowMajorMatrix, feats: &RowMajorMatrix) -> RowMajorMatrix {
        let basis = hstack(&RowMajorMatrix::ones(feats.rows, 1), feats);
        cross_product(xw, &basis)
    }

    /// Features for fitting; fits the featurizer as a side effect.
    fn training_features(
        &mut self,
        x: Option<&RowMajorMatrix>,
        w: Option<&RowMajorMatrix>,
        n_rows: usize,
    ) -> Result<RowMajorMatrix, OrthofitError> {
        let xw = base_features(x, w, n_rows);
        if !self.expands(x) {
            return Ok(xw);
        }
        let x = x.ok_or_else(|| OrthofitError::Configuration("X is required".to_string()))?;
        let feats = match self.featurizer.as_mut() {
            Some(featurizer) => {
                featurizer.fit(x)?;
                featurizer.transform(x)?
            }
            None => x.clone(),
        };
        Ok(Self::expand(&xw, &feats))
    }

    /// Features for prediction; reuses the featurizer fitted during `fit`.
    fn inference_features(
        &self,
        x: Option<&RowMajorMatrix>,
        w: Option<&RowMajorMatrix>,
        n_rows: usize,
    ) -> Result<RowMajorMatrix, OrthofitError> {
        let xw = base_features(x, w, n_rows);
        if !self.expands(x) {
            return Ok(xw);
        }
        let x = x.ok_or_else(|| OrthofitError::Configuration("X is required".to_string()))?;
        let feats = match self.featurizer.as_ref() {
            Some(featurizer) => featurizer.transform(x)?,
            None => x.clone(),
        };
        Ok(Self::expand(&xw, &feats))
    }

    /// Fit the wrapped model. For a classifier, `target` is the one-hot
    /// encoded treatment and is decoded back to labels first.
    pub fn fit(
        &mut self,
        x: Option<&RowMajorMatrix>,
        w: Option<&RowMajorMatrix>,
        target: &RowMajorMatrix,
        sample_weight: Option<&[f64]>,
    ) -> Result<(), OrthofitError> {
        let features = self.training_features(x, w, target.rows)?;
        match &mut self.model {
            FirstStageModel::Regress(model) => model.fit(&features, target, sample_weight),
            FirstStageModel::Classify(model) => {
                let labels = inverse_onehot(target);
                self.n_categories = target.cols + 1;
                model.fit(&features, &labels, self.n_categories, sample_weight)
            }
        }
    }

    /// Predict the target for new rows. When both X and W are absent a
    /// single aggregate row is returned; the caller broadcasts it.
    pub fn predict(
        &self,
        x: Option<&RowMajorMatrix>,
        w: Option<&RowMajorMatrix>,
    ) -> Result<RowMajorMatrix, OrthofitError> {
        let n_rows = x.map(|m| m.rows).or_else(|| w.map(|m| m.rows)).unwrap_or(1);
        let features = self.inference_features(x, w, n_rows)?;
        match &self.model {
            FirstStageModel::Regress(model) => model.predict(&features),
            FirstStageModel::Classify(model) => {
                let probs = model.predict_proba(&features)?;
                // Drop the baseline category so probabilities line up with
                // the one-hot residual columns.
                let mut out = RowMajorMatrix::zeros(probs.rows, self.n_categories - 1);
                for i in 0..probs.rows {
                    for j in 1..self.n_categories {
                        out.set(i, j - 1, probs.get(i, j));
                    }
                }
                Ok(out)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::linear::LinearRegression;
    use crate::models::logistic::LogisticRegression;

    struct FitOnceFeaturizer {
        fitted: bool,
    }

    impl Featurizer for FitOnceFeaturizer {
        fn fit(&mut self, _x: &RowMajorMatrix) -> Result<(), OrthofitError> {
            if self.fitted {
                return Err(OrthofitError::Configuration(
                    "featurizer fit twice".to_string(),
                ));
            }
            self.fitted = true;
            Ok(())
        }

        fn transform(&self, x: &RowMajorMatrix) -> Result<RowMajorMatrix, OrthofitError> {
            if !self.fitted {
                return Err(OrthofitError::NotFitted("transform".to_string()));
            }
            Ok(x.clone())
        }

        fn feature_names(&self, _input: &[String]) -> Option<Vec<String>> {
            None
        }
    }

    #[test]
    fn test_no_features_falls_back_to_ones() {
        let y = RowMajorMatrix::from_vec(vec![1.0, 3.0, 5.0, 7.0]);
        let mut stage = FirstStage::new(
            FirstStageModel::Regress(Box::new(LinearRegression::new(false))),
            true,
            None,
            false,
        );
        stage.fit(None, None, &y, None).unwrap();
        let pred = stage.predict(None, None).unwrap();
        assert_eq!((pred.rows, pred.cols), (1, 1));
        assert!((pred.get(0, 0) - 4.0).abs() < 1e-10);
    }

    #[test]
    fn test_linear_expansion_dimensions() {
        let n = 8;
        let x = RowMajorMatrix::new((0..n * 2).map(|v| v as f64 / 7.0).collect(), n, 2);
        let w = RowMajorMatrix::from_vec((0..n).map(|v| (v % 3) as f64).collect());
        let y = RowMajorMatrix::from_vec((0..n).map(|v| v as f64).collect());
        let mut stage = FirstStage::new(
            FirstStageModel::Regress(Box::new(LinearRegression::new(false))),
            true,
            None,
            true,
        );
        stage.fit(Some(&x), Some(&w), &y, None).unwrap();
        let coef = match &stage.model {
            FirstStageModel::Regress(model) => model.coefficients().unwrap(),
            _ => panic!(),
        };
        // (x0, x1, w) crossed with (1, x0, x1) gives 9 design columns.
        assert_eq!(coef.rows, 9);
    }

    #[test]
    fn test_treatment_model_skips_expansion() {
        let n = 8;
        let x = RowMajorMatrix::new((0..n * 2).map(|v| v as f64 / 7.0).collect(), n, 2);
        let t = RowMajorMatrix::from_vec((0..n).map(|v| v as f64).collect());
        let mut stage = FirstStage::new(
            FirstStageModel::Regress(Box::new(LinearRegression::new(false))),
            false,
            None,
            true,
        );
        stage.fit(Some(&x), None, &t, None).unwrap();
        let coef = match &stage.model {
            FirstStageModel::Regress(model) => model.coefficients().unwrap(),
            _ => panic!(),
        };
        assert_eq!(coef.rows, 2);
    }

    #[test]
    fn test_discrete_target_drops_baseline_column() {
        let x = RowMajorMatrix::from_vec(vec![-2.0, -1.5, -1.0, 1.0, 1.5, 2.0]);
        // One-hot for categories {0, 1, 2} with the baseline column dropped.
        let onehot = RowMajorMatrix::new(
            vec![0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0],
            6,
            2,
        );
        let mut stage = FirstStage::new(
            FirstStageModel::Classify(Box::new(LogisticRegression::new(0.01).unwrap())),
            false,
            None,
            false,
        );
        stage.fit(Some(&x), None, &onehot, None).unwrap();
        let probs = stage.predict(Some(&x), None).unwrap();
        assert_eq!((probs.rows, probs.cols), (6, 2));
        for i in 0..6 {
            for j in 0..2 {
                let p = probs.get(i, j);
                assert!((0.0..=1.0).contains(&p));
            }
        }
    }

    #[test]
    fn test_featurizer_not_refit_at_predict() {
        let n = 6;
        let x = RowMajorMatrix::from_vec((0..n).map(|v| v as f64).collect());
        let y = RowMajorMatrix::from_vec((0..n).map(|v| 2.0 * v as f64).collect());
        let mut stage = FirstStage::new(
            FirstStageModel::Regress(Box::new(LinearRegression::new(false))),
            true,
            Some(Box::new(FitOnceFeaturizer { fitted: false })),
            true,
        );
        stage.fit(Some(&x), None, &y, None).unwrap();
        // A second transform must reuse the fitted state, not fit again.
        stage.predict(Some(&x), None).unwrap();
        stage.predict(Some(&x), None).unwrap();
    }
}
