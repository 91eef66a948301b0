//! Orthogonal Learner
//!
//! The cross-fitting engine behind every estimator in the crate. `fit`
//! validates and encodes the inputs, builds folds, runs the cross-fit
//! executor to obtain out-of-fold nuisance arrays, then fits a single final
//! model on those arrays. Effect and score queries forward-evaluate the
//! fitted final model.
use std::any::Any;

use log::warn;

use crate::crossfit::crossfit;
use crate::data::{CausalData, EffectTensor, RowMajorMatrix, SampleBundle, Target, TreatmentSpec};
use crate::encode::TreatmentEncoder;
use crate::errors::OrthofitError;
use crate::final_stage::EffectModel;
use crate::folds::{build_folds, FoldSpec};
use crate::utils::tile_rows;

/// One per-fold nuisance estimator.
///
/// `fit` trains on a fold's training rows; `predict` produces the nuisance
/// arrays (for the R-learner, outcome and treatment residuals) for held-out
/// rows. Implementations receive the working bundle with the treatment
/// already one-hot encoded when it is discrete.
pub trait NuisanceModel: Send {
    /// Fit on the given rows.
    fn fit(&mut self, data: &SampleBundle) -> Result<(), OrthofitError>;

    /// Nuisance arrays for the given rows, one matrix per nuisance output.
    fn predict(&self, data: &SampleBundle) -> Result<Vec<RowMajorMatrix>, OrthofitError>;

    /// Downcasting hook for estimator-specific introspection.
    fn as_any(&self) -> &dyn Any;
}

/// Scoring capability of a final model.
pub trait FinalScorer {
    /// Goodness of fit for the given data and nuisance arrays.
    fn score(
        &self,
        data: &SampleBundle,
        nuisances: &[RowMajorMatrix],
    ) -> Result<f64, OrthofitError>;
}

/// The single model fit on the whole dataset after cross-fitting.
pub trait FinalModel: Send {
    /// Fit on the restricted bundle and the assembled nuisance arrays.
    fn fit(
        &mut self,
        data: &SampleBundle,
        nuisances: &[RowMajorMatrix],
    ) -> Result<(), OrthofitError>;

    /// Per-treatment effects at the given features, shaped
    /// `(n or 1, d_y, d_t)`.
    fn predict(&self, x: Option<&RowMajorMatrix>) -> Result<EffectTensor, OrthofitError>;

    /// The scoring capability, when implemented.
    fn scorer(&self) -> Option<&dyn FinalScorer> {
        None
    }

    /// The inner effect model, when the final stage wraps one.
    fn effect_model(&self) -> Option<&dyn EffectModel> {
        None
    }
}

/// Builds one fresh nuisance model per fold.
pub type NuisanceFactory = Box<dyn Fn() -> Box<dyn NuisanceModel> + Send + Sync>;

/// Builds the final model fit once after cross-fitting.
pub type FinalFactory = Box<dyn Fn() -> Box<dyn FinalModel> + Send + Sync>;

struct FittedState {
    nuisance_models: Vec<Box<dyn NuisanceModel>>,
    final_model: Box<dyn FinalModel>,
    treatment_encoder: Option<TreatmentEncoder>,
    instrument_encoder: Option<TreatmentEncoder>,
    d_t_in: usize,
    y_is_vector: bool,
    score: Option<f64>,
    fitted_indices: Vec<usize>,
}

/// The generic two-stage orthogonal estimation engine.
///
/// Refitting fully replaces prior state; query methods error until `fit`
/// has succeeded once.
pub struct OrthoLearner {
    nuisance_factory: NuisanceFactory,
    final_factory: FinalFactory,
    discrete_treatment: bool,
    discrete_instrument: bool,
    fold_spec: FoldSpec,
    seed: u64,
    fitted: Option<FittedState>,
}

fn discrete_values(name: &str, target: &Target) -> Result<Vec<f64>, OrthofitError> {
    if target.n_cols() != 1 {
        return Err(OrthofitError::InvalidParameter(
            name.to_string(),
            "a single column of category labels".to_string(),
            format!("{} columns", target.n_cols()),
        ));
    }
    Ok(target.values().to_vec())
}

impl OrthoLearner {
    /// Create a new OrthoLearner.
    ///
    /// * `nuisance_factory` - Builds one fresh nuisance model per fold.
    /// * `final_factory` - Builds the final model fit after cross-fitting.
    /// * `discrete_treatment` - Whether T holds category labels.
    /// * `discrete_instrument` - Whether Z holds category labels.
    /// * `fold_spec` - Fold count or explicit folds for cross-fitting.
    /// * `seed` - Seed for the fold shuffle.
    pub fn new(
        nuisance_factory: NuisanceFactory,
        final_factory: FinalFactory,
        discrete_treatment: bool,
        discrete_instrument: bool,
        fold_spec: FoldSpec,
        seed: u64,
    ) -> Self {
        OrthoLearner {
            nuisance_factory,
            final_factory,
            discrete_treatment,
            discrete_instrument,
            fold_spec,
            seed,
            fitted: None,
        }
    }

    /// Whether the treatment was declared discrete.
    pub fn discrete_treatment(&self) -> bool {
        self.discrete_treatment
    }

    fn state(&self, operation: &str) -> Result<&FittedState, OrthofitError> {
        self.fitted
            .as_ref()
            .ok_or_else(|| OrthofitError::NotFitted(operation.to_string()))
    }

    /// Build the working bundle with Y/T as matrices and discrete columns
    /// one-hot encoded.
    fn encode_bundle(
        data: &CausalData,
        treatment_encoder: Option<&TreatmentEncoder>,
        instrument_encoder: Option<&TreatmentEncoder>,
    ) -> Result<SampleBundle, OrthofitError> {
        let t = match treatment_encoder {
            Some(encoder) => encoder.onehot(&discrete_values("T", &data.t)?)?,
            None => data.t.to_matrix(),
        };
        let z = match (&data.z, instrument_encoder) {
            (Some(z), Some(encoder)) => Some(encoder.onehot(&discrete_values("Z", z)?)?),
            (Some(z), None) => Some(z.to_matrix()),
            (None, _) => None,
        };
        Ok(SampleBundle {
            y: data.y.to_matrix(),
            t,
            x: data.x.clone(),
            w: data.w.clone(),
            z,
            sample_weight: data.sample_weight.clone(),
            sample_var: data.sample_var.clone(),
        })
    }

    /// Fit the estimator: encode, split, cross-fit the nuisances, then fit
    /// the final model on the out-of-fold arrays.
    pub fn fit(&mut self, data: &CausalData) -> Result<(), OrthofitError> {
        data.validate()?;
        let n = data.n_rows();

        let treatment_encoder = if self.discrete_treatment {
            Some(TreatmentEncoder::fit(&discrete_values("T", &data.t)?)?)
        } else {
            None
        };
        let instrument_encoder = match (&data.z, self.discrete_instrument) {
            (Some(z), true) => Some(TreatmentEncoder::fit(&discrete_values("Z", z)?)?),
            _ => None,
        };

        let strat_labels = match &treatment_encoder {
            Some(encoder) => Some(encoder.labels(&discrete_values("T", &data.t)?)?),
            None => None,
        };
        let folds = build_folds(
            &self.fold_spec,
            n,
            strat_labels.as_deref(),
            data.sample_weight.as_deref(),
            self.seed,
        )?;

        let bundle = Self::encode_bundle(
            data,
            treatment_encoder.as_ref(),
            instrument_encoder.as_ref(),
        )?;
        let result = crossfit(
            &self.nuisance_factory,
            &folds,
            &bundle,
            self.discrete_treatment,
        )?;

        let (bundle, nuisances) = if result.fitted_indices.len() < n {
            if result.fitted_indices.is_empty() {
                return Err(OrthofitError::InvalidFolds(
                    "no rows were covered by any test fold".to_string(),
                ));
            }
            warn!(
                "{} of {n} rows were not covered by any test fold and are dropped from the final stage",
                n - result.fitted_indices.len()
            );
            let nuisances = result
                .nuisances
                .iter()
                .map(|m| m.take_rows(&result.fitted_indices))
                .collect();
            (bundle.take_rows(&result.fitted_indices), nuisances)
        } else {
            (bundle, result.nuisances)
        };

        let mut final_model = (self.final_factory)();
        final_model.fit(&bundle, &nuisances)?;
        let score = match final_model.scorer() {
            Some(scorer) => Some(scorer.score(&bundle, &nuisances)?),
            None => None,
        };

        self.fitted = Some(FittedState {
            nuisance_models: result.models,
            final_model,
            treatment_encoder,
            instrument_encoder,
            d_t_in: data.t.n_cols(),
            y_is_vector: data.y.is_vector(),
            score,
            fitted_indices: result.fitted_indices,
        });
        Ok(())
    }

    /// Constant marginal effect at the given features, `(n or 1, d_y, d_t)`.
    pub fn const_marginal_effect(
        &self,
        x: Option<&RowMajorMatrix>,
    ) -> Result<EffectTensor, OrthofitError> {
        let state = self.state("const_marginal_effect")?;
        state.final_model.predict(x)
    }

    /// Materialize a treatment spec into encoded `(n_rows, d_t)` rows.
    fn expand_treatment(
        state: &FittedState,
        spec: &TreatmentSpec,
        n_rows: usize,
    ) -> Result<RowMajorMatrix, OrthofitError> {
        match &state.treatment_encoder {
            Some(encoder) => {
                let values = match spec {
                    TreatmentSpec::Scalar(v) => vec![*v; n_rows],
                    TreatmentSpec::PerRow(v) => v.clone(),
                    TreatmentSpec::Rows(m) if m.cols == 1 => m.column(0),
                    TreatmentSpec::Rows(m) => {
                        return Err(OrthofitError::InvalidParameter(
                            "treatment".to_string(),
                            "a single column of category labels".to_string(),
                            format!("{} columns", m.cols),
                        ))
                    }
                };
                if values.len() != n_rows {
                    return Err(OrthofitError::RowCountMismatch(
                        "treatment".to_string(),
                        values.len(),
                        n_rows,
                    ));
                }
                encoder.onehot(&values)
            }
            None => match spec {
                TreatmentSpec::Scalar(v) => {
                    if state.d_t_in > 1 {
                        warn!(
                            "a scalar was specified for a treatment with {} columns; \
                             the same value is used for every column",
                            state.d_t_in
                        );
                    }
                    Ok(RowMajorMatrix::new(
                        vec![*v; n_rows * state.d_t_in],
                        n_rows,
                        state.d_t_in,
                    ))
                }
                TreatmentSpec::PerRow(v) => {
                    if state.d_t_in != 1 {
                        return Err(OrthofitError::InvalidParameter(
                            "treatment".to_string(),
                            format!("rows with {} columns", state.d_t_in),
                            "a single column".to_string(),
                        ));
                    }
                    if v.len() != n_rows {
                        return Err(OrthofitError::RowCountMismatch(
                            "treatment".to_string(),
                            v.len(),
                            n_rows,
                        ));
                    }
                    Ok(RowMajorMatrix::from_vec(v.clone()))
                }
                TreatmentSpec::Rows(m) => {
                    if m.cols != state.d_t_in {
                        return Err(OrthofitError::InvalidParameter(
                            "treatment".to_string(),
                            format!("rows with {} columns", state.d_t_in),
                            format!("{} columns", m.cols),
                        ));
                    }
                    if m.rows != n_rows {
                        return Err(OrthofitError::RowCountMismatch(
                            "treatment".to_string(),
                            m.rows,
                            n_rows,
                        ));
                    }
                    Ok(m.clone())
                }
            },
        }
    }

    /// Effect of moving every row from treatment `t0` to `t1`, `(n, d_y)`,
    /// squeezed to a vector when the fitted outcome was a vector.
    ///
    /// With `t0` unset the baseline category (discrete) or zero (continuous)
    /// is used.
    pub fn effect(
        &self,
        x: Option<&RowMajorMatrix>,
        t0: Option<&TreatmentSpec>,
        t1: &TreatmentSpec,
    ) -> Result<Target, OrthofitError> {
        let state = self.state("effect")?;
        let n_rows = x
            .map(|m| m.rows)
            .or_else(|| t0.and_then(|s| s.n_rows()))
            .or_else(|| t1.n_rows())
            .unwrap_or(1);
        let default_t0 = match &state.treatment_encoder {
            Some(encoder) => TreatmentSpec::Scalar(encoder.categories()[0]),
            None => TreatmentSpec::Scalar(0.0),
        };
        let t0 = t0.unwrap_or(&default_t0);
        let t0_rows = Self::expand_treatment(state, t0, n_rows)?;
        let t1_rows = Self::expand_treatment(state, t1, n_rows)?;

        let cme = state.final_model.predict(x)?;
        if t1_rows.cols != cme.d_t {
            return Err(OrthofitError::Configuration(format!(
                "treatment rows have {} columns but the fitted effect has {}",
                t1_rows.cols, cme.d_t
            )));
        }
        let cme = if cme.n == n_rows {
            cme
        } else if cme.n == 1 {
            // Featureless final models yield one effect row; broadcast it.
            let mut tiled = EffectTensor::zeros(n_rows, cme.d_y, cme.d_t);
            for i in 0..n_rows {
                for j in 0..cme.d_y {
                    for k in 0..cme.d_t {
                        tiled.set(i, j, k, cme.get(0, j, k));
                    }
                }
            }
            tiled
        } else {
            return Err(OrthofitError::RowCountMismatch(
                "X".to_string(),
                cme.n,
                n_rows,
            ));
        };

        let mut delta = RowMajorMatrix::zeros(n_rows, cme.d_t);
        for i in 0..n_rows {
            for k in 0..cme.d_t {
                delta.set(i, k, t1_rows.get(i, k) - t0_rows.get(i, k));
            }
        }
        let out = cme.contract_treatment(&delta);
        Ok(Target::from_matrix(out, state.y_is_vector))
    }

    /// Average of `effect` over the queried rows, one value per outcome
    /// column.
    pub fn ate(
        &self,
        x: Option<&RowMajorMatrix>,
        t0: Option<&TreatmentSpec>,
        t1: &TreatmentSpec,
    ) -> Result<Vec<f64>, OrthofitError> {
        let effects = self.effect(x, t0, t1)?.to_matrix();
        Ok((0..effects.cols)
            .map(|j| effects.column(j).iter().sum::<f64>() / effects.rows as f64)
            .collect())
    }

    /// Score the fitted estimator on new data.
    ///
    /// Nuisance arrays are recomputed as the mean prediction across the
    /// per-fold nuisance models, then handed to the final model's scorer.
    pub fn score(&self, data: &CausalData) -> Result<f64, OrthofitError> {
        let state = self.state("score")?;
        data.validate()?;
        let bundle = Self::encode_bundle(
            data,
            state.treatment_encoder.as_ref(),
            state.instrument_encoder.as_ref(),
        )?;
        let n = bundle.n_rows();

        let mut mean: Option<Vec<RowMajorMatrix>> = None;
        for model in &state.nuisance_models {
            let mut preds = model.predict(&bundle)?;
            for m in preds.iter_mut() {
                if m.rows == 1 && n > 1 {
                    *m = tile_rows(m, n);
                }
            }
            match &mut mean {
                None => mean = Some(preds),
                Some(acc) => {
                    if acc.len() != preds.len() {
                        return Err(OrthofitError::Configuration(
                            "nuisance models returned different numbers of outputs".to_string(),
                        ));
                    }
                    for (a, p) in acc.iter_mut().zip(&preds) {
                        if (a.rows, a.cols) != (p.rows, p.cols) {
                            return Err(OrthofitError::Configuration(
                                "nuisance models returned differently shaped outputs".to_string(),
                            ));
                        }
                        for (av, pv) in a.data.iter_mut().zip(&p.data) {
                            *av += pv;
                        }
                    }
                }
            }
        }
        let mut nuisances =
            mean.ok_or_else(|| OrthofitError::NotFitted("score".to_string()))?;
        let count = state.nuisance_models.len() as f64;
        for m in nuisances.iter_mut() {
            for v in m.data.iter_mut() {
                *v /= count;
            }
        }

        let scorer = state.final_model.scorer().ok_or_else(|| {
            OrthofitError::MissingCapability(
                "the final model does not implement scoring".to_string(),
            )
        })?;
        scorer.score(&bundle, &nuisances)
    }

    /// Per-fold fitted nuisance models, in fold order.
    pub fn nuisance_models(&self) -> Result<&[Box<dyn NuisanceModel>], OrthofitError> {
        Ok(&self.state("nuisance_models")?.nuisance_models)
    }

    /// The fitted final model.
    pub fn final_model(&self) -> Result<&dyn FinalModel, OrthofitError> {
        Ok(self.state("final_model")?.final_model.as_ref())
    }

    /// In-sample score recorded at fit time, when the final model scores.
    pub fn training_score(&self) -> Option<f64> {
        self.fitted.as_ref().and_then(|state| state.score)
    }

    /// Rows that received an out-of-fold prediction during the last fit.
    pub fn fitted_indices(&self) -> Result<&[usize], OrthofitError> {
        Ok(&self.state("fitted_indices")?.fitted_indices)
    }

    /// Category values of a discrete treatment, in encoding order.
    pub fn treatment_categories(&self) -> Option<&[f64]> {
        self.fitted
            .as_ref()
            .and_then(|state| state.treatment_encoder.as_ref())
            .map(|encoder| encoder.categories())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::folds::Fold;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Residuals against an all-zero prediction, so the raw arrays pass
    /// straight through.
    struct PassThroughNuisance;

    impl NuisanceModel for PassThroughNuisance {
        fn fit(&mut self, _data: &SampleBundle) -> Result<(), OrthofitError> {
            Ok(())
        }

        fn predict(&self, data: &SampleBundle) -> Result<Vec<RowMajorMatrix>, OrthofitError> {
            Ok(vec![data.y.clone(), data.t.clone()])
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    /// Final model fitting the scalar ratio sum(y_res * t_res) / sum(t_res^2).
    struct RatioFinal {
        theta: f64,
        rows_seen: Arc<AtomicUsize>,
        fits: Arc<AtomicUsize>,
        scorable: bool,
    }

    impl FinalModel for RatioFinal {
        fn fit(
            &mut self,
            data: &SampleBundle,
            nuisances: &[RowMajorMatrix],
        ) -> Result<(), OrthofitError> {
            let y_res = &nuisances[0];
            let t_res = &nuisances[1];
            let mut num = 0.0;
            let mut den = 0.0;
            for i in 0..y_res.rows {
                num += y_res.get(i, 0) * t_res.get(i, 0);
                den += t_res.get(i, 0) * t_res.get(i, 0);
            }
            self.theta = num / den;
            self.rows_seen.store(data.n_rows(), Ordering::SeqCst);
            self.fits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn predict(&self, x: Option<&RowMajorMatrix>) -> Result<EffectTensor, OrthofitError> {
            let n = x.map_or(1, |m| m.rows);
            Ok(EffectTensor::new(vec![self.theta; n], n, 1, 1))
        }

        fn scorer(&self) -> Option<&dyn FinalScorer> {
            if self.scorable {
                Some(self)
            } else {
                None
            }
        }
    }

    impl FinalScorer for RatioFinal {
        fn score(
            &self,
            _data: &SampleBundle,
            nuisances: &[RowMajorMatrix],
        ) -> Result<f64, OrthofitError> {
            let y_res = &nuisances[0];
            let t_res = &nuisances[1];
            let mut sse = 0.0;
            for i in 0..y_res.rows {
                let diff = y_res.get(i, 0) - self.theta * t_res.get(i, 0);
                sse += diff * diff;
            }
            Ok(sse / y_res.rows as f64)
        }
    }

    fn ratio_learner(
        scorable: bool,
        fold_spec: FoldSpec,
    ) -> (OrthoLearner, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let rows_seen = Arc::new(AtomicUsize::new(0));
        let fits = Arc::new(AtomicUsize::new(0));
        let rows_handle = Arc::clone(&rows_seen);
        let fits_handle = Arc::clone(&fits);
        let learner = OrthoLearner::new(
            Box::new(|| Box::new(PassThroughNuisance)),
            Box::new(move || {
                Box::new(RatioFinal {
                    theta: 0.0,
                    rows_seen: Arc::clone(&rows_handle),
                    fits: Arc::clone(&fits_handle),
                    scorable,
                })
            }),
            false,
            false,
            fold_spec,
            7,
        );
        (learner, rows_seen, fits)
    }

    fn linear_data(n: usize) -> CausalData {
        let t: Vec<f64> = (0..n).map(|i| (i as f64 / n as f64) - 0.5).collect();
        let y: Vec<f64> = t.iter().map(|v| 2.0 * v).collect();
        CausalData::new(y, t)
    }

    #[test]
    fn test_unfitted_queries_error() {
        let (learner, _, _) = ratio_learner(true, FoldSpec::KFolds(2));
        assert!(matches!(
            learner.const_marginal_effect(None),
            Err(OrthofitError::NotFitted(_))
        ));
        assert!(matches!(
            learner.effect(None, None, &TreatmentSpec::Scalar(1.0)),
            Err(OrthofitError::NotFitted(_))
        ));
        assert!(learner.nuisance_models().is_err());
        assert!(learner.training_score().is_none());
    }

    #[test]
    fn test_fit_and_ratio_effect() {
        let (mut learner, _, _) = ratio_learner(true, FoldSpec::KFolds(3));
        let data = linear_data(30);
        learner.fit(&data).unwrap();
        assert_eq!(learner.nuisance_models().unwrap().len(), 3);

        let cme = learner.const_marginal_effect(None).unwrap();
        assert_eq!((cme.n, cme.d_y, cme.d_t), (1, 1, 1));
        assert!((cme.get(0, 0, 0) - 2.0).abs() < 1e-10);

        let effect = learner
            .effect(None, None, &TreatmentSpec::Scalar(3.0))
            .unwrap();
        assert!(effect.is_vector());
        assert!((effect.values()[0] - 6.0).abs() < 1e-9);

        // Exact fit, so the recorded training score is zero.
        assert!(learner.training_score().unwrap() < 1e-18);
    }

    #[test]
    fn test_refit_replaces_state() {
        let (mut learner, _, fits) = ratio_learner(true, FoldSpec::KFolds(2));
        let data = linear_data(20);
        learner.fit(&data).unwrap();
        learner.fit(&data).unwrap();
        assert_eq!(learner.nuisance_models().unwrap().len(), 2);
        assert_eq!(fits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_missing_score_capability() {
        let (mut learner, _, _) = ratio_learner(false, FoldSpec::KFolds(2));
        let data = linear_data(20);
        learner.fit(&data).unwrap();
        assert!(learner.training_score().is_none());
        assert!(matches!(
            learner.score(&data),
            Err(OrthofitError::MissingCapability(_))
        ));
    }

    #[test]
    fn test_score_on_new_data() {
        let (mut learner, _, _) = ratio_learner(true, FoldSpec::KFolds(2));
        learner.fit(&linear_data(20)).unwrap();
        let score = learner.score(&linear_data(12)).unwrap();
        assert!(score < 1e-18);
    }

    #[test]
    fn test_partial_coverage_slices_rows() {
        // Rows 8 and 9 are in no test set; the final stage must not see them.
        let folds = vec![
            Fold {
                train: (4..8).collect(),
                test: (0..4).collect(),
            },
            Fold {
                train: (0..4).collect(),
                test: (4..8).collect(),
            },
        ];
        let (mut learner, rows_seen, _) = ratio_learner(true, FoldSpec::Explicit(folds));
        learner.fit(&linear_data(10)).unwrap();
        assert_eq!(rows_seen.load(Ordering::SeqCst), 8);
        assert_eq!(learner.fitted_indices().unwrap(), (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_single_category_rejected() {
        let rows_seen = Arc::new(AtomicUsize::new(0));
        let fits = Arc::new(AtomicUsize::new(0));
        let rows_handle = Arc::clone(&rows_seen);
        let fits_handle = Arc::clone(&fits);
        let mut learner = OrthoLearner::new(
            Box::new(|| Box::new(PassThroughNuisance)),
            Box::new(move || {
                Box::new(RatioFinal {
                    theta: 0.0,
                    rows_seen: Arc::clone(&rows_handle),
                    fits: Arc::clone(&fits_handle),
                    scorable: true,
                })
            }),
            true,
            false,
            FoldSpec::KFolds(2),
            7,
        );
        let data = CausalData::new(vec![1.0, 2.0, 3.0, 4.0], vec![1.0, 1.0, 1.0, 1.0]);
        assert!(matches!(
            learner.fit(&data),
            Err(OrthofitError::Configuration(_))
        ));
    }
}
