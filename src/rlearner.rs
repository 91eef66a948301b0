//! R-Learner
//!
//! The residualization estimator: per fold, first stages predict the outcome
//! and the treatment from features and controls, and the held-out residuals
//! feed a single effect regression. Removing both conditional means makes
//! the effect estimate insensitive to small first-stage errors.
use std::any::Any;
use std::sync::Arc;

use crate::data::{CausalData, EffectTensor, RowMajorMatrix, SampleBundle, Target, TreatmentSpec};
use crate::errors::OrthofitError;
use crate::featurize::FeaturizerFactory;
use crate::final_stage::{EffectModel, EffectModelFactory};
use crate::first_stage::{FirstStage, FirstStageModel};
use crate::folds::FoldSpec;
use crate::models::{ClassifierFactory, RegressorFactory};
use crate::ortho::{
    FinalFactory, FinalModel, FinalScorer, NuisanceFactory, NuisanceModel, OrthoLearner,
};
use crate::utils::{tile_rows, weighted_mean};

/// First-stage treatment model choice.
pub enum TreatmentModel {
    /// Regress the treatment on features, for continuous treatments.
    Regress(RegressorFactory),
    /// Classify the treatment, for discrete treatments. Residuals are taken
    /// against predicted probabilities with the baseline column dropped.
    Classify(ClassifierFactory),
}

fn residual(
    name: &str,
    actual: &RowMajorMatrix,
    predicted: &RowMajorMatrix,
) -> Result<RowMajorMatrix, OrthofitError> {
    if (predicted.rows, predicted.cols) != (actual.rows, actual.cols) {
        return Err(OrthofitError::Configuration(format!(
            "the {name} first stage produced a ({}, {}) prediction for a ({}, {}) target",
            predicted.rows, predicted.cols, actual.rows, actual.cols
        )));
    }
    let data = actual
        .data
        .iter()
        .zip(&predicted.data)
        .map(|(a, p)| a - p)
        .collect();
    Ok(RowMajorMatrix::new(data, actual.rows, actual.cols))
}

/// Per-fold residualizer. Fits the outcome and treatment first stages on a
/// training split and emits `[y_res, t_res]` for held-out rows.
pub struct RLearnerNuisance {
    model_y: FirstStage,
    model_t: FirstStage,
}

impl RLearnerNuisance {
    /// The fitted outcome first stage.
    pub fn outcome_stage(&self) -> &FirstStage {
        &self.model_y
    }

    /// The fitted treatment first stage.
    pub fn treatment_stage(&self) -> &FirstStage {
        &self.model_t
    }
}

impl NuisanceModel for RLearnerNuisance {
    fn fit(&mut self, data: &SampleBundle) -> Result<(), OrthofitError> {
        if data.z.is_some() {
            return Err(OrthofitError::Configuration(
                "the residualization estimator does not use an instrument".to_string(),
            ));
        }
        let weights = data.sample_weight.as_deref();
        self.model_t
            .fit(data.x.as_ref(), data.w.as_ref(), &data.t, weights)?;
        self.model_y
            .fit(data.x.as_ref(), data.w.as_ref(), &data.y, weights)?;
        Ok(())
    }

    fn predict(&self, data: &SampleBundle) -> Result<Vec<RowMajorMatrix>, OrthofitError> {
        let n = data.n_rows();
        let mut pred_y = self.model_y.predict(data.x.as_ref(), data.w.as_ref())?;
        let mut pred_t = self.model_t.predict(data.x.as_ref(), data.w.as_ref())?;
        // Featureless first stages return one aggregate row.
        if pred_y.rows == 1 && n > 1 {
            pred_y = tile_rows(&pred_y, n);
        }
        if pred_t.rows == 1 && n > 1 {
            pred_t = tile_rows(&pred_t, n);
        }
        let y_res = residual("outcome", &data.y, &pred_y)?;
        let t_res = residual("treatment", &data.t, &pred_t)?;
        Ok(vec![y_res, t_res])
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn expect_residuals(
    nuisances: &[RowMajorMatrix],
) -> Result<(&RowMajorMatrix, &RowMajorMatrix), OrthofitError> {
    match nuisances {
        [y_res, t_res] => Ok((y_res, t_res)),
        _ => Err(OrthofitError::Configuration(format!(
            "expected outcome and treatment residual arrays, received {}",
            nuisances.len()
        ))),
    }
}

/// Final-stage adapter: fits the effect model on the residual arrays and
/// scores it by the mean squared residual equation error.
struct RLearnerFinal {
    effect_model: Box<dyn EffectModel>,
}

impl FinalModel for RLearnerFinal {
    fn fit(
        &mut self,
        data: &SampleBundle,
        nuisances: &[RowMajorMatrix],
    ) -> Result<(), OrthofitError> {
        let (y_res, t_res) = expect_residuals(nuisances)?;
        self.effect_model.fit(
            data.x.as_ref(),
            t_res,
            y_res,
            data.sample_weight.as_deref(),
            data.sample_var.as_deref(),
        )
    }

    fn predict(&self, x: Option<&RowMajorMatrix>) -> Result<EffectTensor, OrthofitError> {
        self.effect_model.predict(x)
    }

    fn scorer(&self) -> Option<&dyn FinalScorer> {
        Some(self)
    }

    fn effect_model(&self) -> Option<&dyn EffectModel> {
        Some(self.effect_model.as_ref())
    }
}

impl FinalScorer for RLearnerFinal {
    fn score(
        &self,
        data: &SampleBundle,
        nuisances: &[RowMajorMatrix],
    ) -> Result<f64, OrthofitError> {
        let (y_res, t_res) = expect_residuals(nuisances)?;
        let n = y_res.rows;
        let effects = self.effect_model.predict(data.x.as_ref())?;
        if effects.n != n && effects.n != 1 {
            return Err(OrthofitError::RowCountMismatch("X".to_string(), effects.n, n));
        }
        if effects.d_y != y_res.cols || effects.d_t != t_res.cols {
            return Err(OrthofitError::Configuration(format!(
                "the fitted effect is ({}, {}) per row but the residuals are ({}, {})",
                effects.d_y, effects.d_t, y_res.cols, t_res.cols
            )));
        }
        let at = |i: usize, j: usize, k: usize| {
            if effects.n == 1 {
                effects.get(0, j, k)
            } else {
                effects.get(i, j, k)
            }
        };
        let weights = data.sample_weight.as_deref();
        let mut total = 0.0;
        for j in 0..y_res.cols {
            let squared: Vec<f64> = (0..n)
                .map(|i| {
                    let mut predicted = 0.0;
                    for k in 0..t_res.cols {
                        predicted += at(i, j, k) * t_res.get(i, k);
                    }
                    let diff = y_res.get(i, j) - predicted;
                    diff * diff
                })
                .collect();
            total += weighted_mean(&squared, weights);
        }
        Ok(total / y_res.cols as f64)
    }
}

/// Residual-on-residual estimator with pluggable first stages and effect
/// model.
///
/// Configuration setters chain and take effect at the next `fit`; query
/// methods error until `fit` has succeeded once.
pub struct RLearner {
    model_y: Arc<RegressorFactory>,
    model_t: Arc<TreatmentModel>,
    effect_model: Arc<EffectModelFactory>,
    featurizer: Option<Arc<FeaturizerFactory>>,
    linear_first_stages: bool,
    discrete_treatment: bool,
    fold_spec: FoldSpec,
    seed: u64,
    engine: Option<OrthoLearner>,
}

impl RLearner {
    /// Create a new RLearner.
    ///
    /// * `model_y` - Factory for the outcome first-stage regressor.
    /// * `model_t` - Treatment first-stage model; must classify exactly when
    ///   the treatment is discrete.
    /// * `effect_model` - Factory for the final-stage effect model.
    /// * `discrete_treatment` - Whether T holds category labels.
    pub fn new(
        model_y: RegressorFactory,
        model_t: TreatmentModel,
        effect_model: EffectModelFactory,
        discrete_treatment: bool,
    ) -> Result<Self, OrthofitError> {
        match (&model_t, discrete_treatment) {
            (TreatmentModel::Regress(_), true) => {
                return Err(OrthofitError::Configuration(
                    "a discrete treatment needs a classifying first stage".to_string(),
                ))
            }
            (TreatmentModel::Classify(_), false) => {
                return Err(OrthofitError::Configuration(
                    "a classifying first stage needs a discrete treatment".to_string(),
                ))
            }
            _ => {}
        }
        Ok(RLearner {
            model_y: Arc::new(model_y),
            model_t: Arc::new(model_t),
            effect_model: Arc::new(effect_model),
            featurizer: None,
            linear_first_stages: false,
            discrete_treatment,
            fold_spec: FoldSpec::KFolds(2),
            seed: 0,
            engine: None,
        })
    }

    /// Set the factory for the first-stage featurizer.
    pub fn set_featurizer(mut self, featurizer: FeaturizerFactory) -> Self {
        self.featurizer = Some(Arc::new(featurizer));
        self
    }

    /// Set whether outcome first-stage features are expanded with
    /// treatment-by-feature interactions.
    pub fn set_linear_first_stages(mut self, linear_first_stages: bool) -> Self {
        self.linear_first_stages = linear_first_stages;
        self
    }

    /// Set the fold count or explicit folds for cross-fitting.
    pub fn set_fold_spec(mut self, fold_spec: FoldSpec) -> Self {
        self.fold_spec = fold_spec;
        self
    }

    /// Set the seed for fold shuffling.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    fn build_engine(&self) -> OrthoLearner {
        let model_y = Arc::clone(&self.model_y);
        let model_t = Arc::clone(&self.model_t);
        let featurizer = self.featurizer.as_ref().map(Arc::clone);
        let linear_first_stages = self.linear_first_stages;
        let nuisance_factory: NuisanceFactory = Box::new(move || {
            let stage_featurizer = |f: &Option<Arc<FeaturizerFactory>>| {
                f.as_ref().map(|factory| factory())
            };
            let outcome = FirstStage::new(
                FirstStageModel::Regress((model_y)()),
                true,
                stage_featurizer(&featurizer),
                linear_first_stages,
            );
            let treatment = FirstStage::new(
                match model_t.as_ref() {
                    TreatmentModel::Regress(factory) => FirstStageModel::Regress(factory()),
                    TreatmentModel::Classify(factory) => FirstStageModel::Classify(factory()),
                },
                false,
                stage_featurizer(&featurizer),
                linear_first_stages,
            );
            Box::new(RLearnerNuisance {
                model_y: outcome,
                model_t: treatment,
            })
        });

        let effect_model = Arc::clone(&self.effect_model);
        let final_factory: FinalFactory = Box::new(move || {
            Box::new(RLearnerFinal {
                effect_model: (effect_model)(),
            })
        });

        OrthoLearner::new(
            nuisance_factory,
            final_factory,
            self.discrete_treatment,
            false,
            self.fold_spec.clone(),
            self.seed,
        )
    }

    fn engine(&self, operation: &str) -> Result<&OrthoLearner, OrthofitError> {
        self.engine
            .as_ref()
            .ok_or_else(|| OrthofitError::NotFitted(operation.to_string()))
    }

    /// Fit the estimator on the given data.
    pub fn fit(&mut self, data: &CausalData) -> Result<(), OrthofitError> {
        let mut engine = self.build_engine();
        engine.fit(data)?;
        self.engine = Some(engine);
        Ok(())
    }

    /// Constant marginal effect at the given features, `(n or 1, d_y, d_t)`.
    pub fn const_marginal_effect(
        &self,
        x: Option<&RowMajorMatrix>,
    ) -> Result<EffectTensor, OrthofitError> {
        self.engine("const_marginal_effect")?.const_marginal_effect(x)
    }

    /// Effect of moving every row from treatment `t0` to `t1`.
    pub fn effect(
        &self,
        x: Option<&RowMajorMatrix>,
        t0: Option<&TreatmentSpec>,
        t1: &TreatmentSpec,
    ) -> Result<Target, OrthofitError> {
        self.engine("effect")?.effect(x, t0, t1)
    }

    /// Average effect over the queried rows, one value per outcome column.
    pub fn ate(
        &self,
        x: Option<&RowMajorMatrix>,
        t0: Option<&TreatmentSpec>,
        t1: &TreatmentSpec,
    ) -> Result<Vec<f64>, OrthofitError> {
        self.engine("ate")?.ate(x, t0, t1)
    }

    /// Score the fitted estimator on new data by residual mean squared
    /// error.
    pub fn score(&self, data: &CausalData) -> Result<f64, OrthofitError> {
        self.engine("score")?.score(data)
    }

    /// In-sample score recorded at fit time.
    pub fn training_score(&self) -> Option<f64> {
        self.engine.as_ref().and_then(|engine| engine.training_score())
    }

    /// Rows that received an out-of-fold prediction during the last fit.
    pub fn fitted_indices(&self) -> Result<&[usize], OrthofitError> {
        self.engine("fitted_indices")?.fitted_indices()
    }

    /// Category values of a discrete treatment, in encoding order.
    pub fn treatment_categories(&self) -> Option<&[f64]> {
        self.engine.as_ref().and_then(|engine| engine.treatment_categories())
    }

    fn residualizers(&self, operation: &str) -> Result<Vec<&RLearnerNuisance>, OrthofitError> {
        self.engine(operation)?
            .nuisance_models()?
            .iter()
            .map(|model| {
                model
                    .as_any()
                    .downcast_ref::<RLearnerNuisance>()
                    .ok_or_else(|| {
                        OrthofitError::MissingCapability(
                            "the fitted nuisance models are not residualizers".to_string(),
                        )
                    })
            })
            .collect()
    }

    /// Per-fold fitted outcome first stages, in fold order.
    pub fn models_y(&self) -> Result<Vec<&FirstStage>, OrthofitError> {
        Ok(self
            .residualizers("models_y")?
            .into_iter()
            .map(RLearnerNuisance::outcome_stage)
            .collect())
    }

    /// Per-fold fitted treatment first stages, in fold order.
    pub fn models_t(&self) -> Result<Vec<&FirstStage>, OrthofitError> {
        Ok(self
            .residualizers("models_t")?
            .into_iter()
            .map(RLearnerNuisance::treatment_stage)
            .collect())
    }

    /// The fitted effect model.
    pub fn effect_model(&self) -> Result<&dyn EffectModel, OrthofitError> {
        self.engine("effect_model")?
            .final_model()?
            .effect_model()
            .ok_or_else(|| {
                OrthofitError::MissingCapability(
                    "the final model does not expose an effect model".to_string(),
                )
            })
    }

    /// Names of the effect features, mapped through the final-stage
    /// featurizer when one is attached.
    pub fn cate_feature_names(
        &self,
        input_names: &[String],
    ) -> Result<Vec<String>, OrthofitError> {
        self.effect_model()?
            .feature_names(input_names)
            .ok_or_else(|| {
                OrthofitError::MissingCapability(
                    "the attached featurizer does not provide feature names".to_string(),
                )
            })
    }
}
