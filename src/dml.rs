//! DML
//!
//! The double machine learning estimator family. `Dml` wires first-stage
//! model choices, an optional featurizer and a final-stage mode into the
//! residualization engine; the associated constructors cover the common
//! configurations (linear, sparse linear, kernel, nonparametric final
//! stage).
use std::sync::Arc;

use crate::data::{CausalData, EffectTensor, RowMajorMatrix, Target, TreatmentSpec};
use crate::errors::OrthofitError;
use crate::featurize::{FeaturizerFactory, RandomFourierFeatures};
use crate::final_stage::{EffectModel, EffectModelFactory, LinearFinalStage, WeightedFinalStage};
use crate::first_stage::FirstStage;
use crate::folds::FoldSpec;
use crate::models::debiased::DebiasedLasso;
use crate::models::lasso::WeightedLassoCv;
use crate::models::linear::LinearRegression;
use crate::models::logistic::LogisticRegression;
use crate::models::{ClassifierFactory, Regressor, RegressorFactory};
use crate::rlearner::{RLearner, TreatmentModel};

/// Default clamp for the weight-trick treatment residual denominator.
pub const DEFAULT_RES_CLIP: f64 = 1e-5;

/// A first-stage model choice.
pub enum NuisanceSpec {
    /// Resolve to the built-in cross-validated weighted lasso for continuous
    /// targets, or to logistic regression for a discrete treatment.
    Auto,
    /// An explicit regressor factory.
    Regress(RegressorFactory),
    /// An explicit classifier factory; only valid as the treatment model of
    /// a discrete treatment.
    Classify(ClassifierFactory),
}

/// The final-stage mode.
pub enum FinalSpec {
    /// Cross the effect features with the treatment residuals and fit the
    /// given linear model on the product basis.
    Linear(RegressorFactory),
    /// Reduce the effect regression to a weighted problem around an
    /// arbitrary regressor; single continuous or binary discrete treatment
    /// only.
    WeightTrick {
        /// The weighted regressor modeling the effect directly.
        model: RegressorFactory,
        /// Minimum magnitude for the treatment residual denominator.
        res_clip: f64,
    },
}

/// Options shared across the estimator family.
pub struct DmlOptions {
    /// Featurizer applied to X in the final stage, and in the outcome first
    /// stage when `linear_first_stages` is set.
    pub featurizer: Option<FeaturizerFactory>,
    /// Prepend a constant effect feature in the linear final mode.
    pub fit_cate_intercept: bool,
    /// Expand outcome first-stage features with featurized-X interactions.
    pub linear_first_stages: bool,
    /// Fold count or explicit folds for cross-fitting.
    pub fold_spec: FoldSpec,
    /// Seed for fold shuffling, auto CV models and random featurizers.
    pub seed: u64,
}

impl Default for DmlOptions {
    fn default() -> Self {
        DmlOptions {
            featurizer: None,
            fit_cate_intercept: true,
            linear_first_stages: false,
            fold_spec: FoldSpec::default(),
            seed: 0,
        }
    }
}

fn resolve_outcome(spec: NuisanceSpec, seed: u64) -> Result<RegressorFactory, OrthofitError> {
    match spec {
        NuisanceSpec::Auto => Ok(Box::new(move || Box::new(WeightedLassoCv::new(true, seed)))),
        NuisanceSpec::Regress(factory) => Ok(factory),
        NuisanceSpec::Classify(_) => Err(OrthofitError::Configuration(
            "the outcome model must be a regressor".to_string(),
        )),
    }
}

fn resolve_treatment(
    spec: NuisanceSpec,
    discrete_treatment: bool,
    seed: u64,
) -> Result<TreatmentModel, OrthofitError> {
    match (spec, discrete_treatment) {
        (NuisanceSpec::Auto, false) => Ok(TreatmentModel::Regress(Box::new(move || {
            Box::new(WeightedLassoCv::new(true, seed))
        }))),
        (NuisanceSpec::Auto, true) => Ok(TreatmentModel::Classify(Box::new(|| {
            Box::new(LogisticRegression::default())
        }))),
        (NuisanceSpec::Regress(factory), false) => Ok(TreatmentModel::Regress(factory)),
        (NuisanceSpec::Classify(factory), true) => Ok(TreatmentModel::Classify(factory)),
        (NuisanceSpec::Regress(_), true) => Err(OrthofitError::Configuration(
            "a discrete treatment needs a classifying treatment model".to_string(),
        )),
        (NuisanceSpec::Classify(_), false) => Err(OrthofitError::Configuration(
            "a classifying treatment model needs a discrete treatment".to_string(),
        )),
    }
}

/// The general double machine learning estimator.
///
/// First stages residualize the outcome and the treatment per fold; the
/// configured final stage regresses residual on residual to obtain the
/// heterogeneous effect. Use the associated constructors for the common
/// configurations.
pub struct Dml {
    learner: RLearner,
}

impl Dml {
    /// Create a new Dml.
    ///
    /// * `model_y` - Outcome first-stage choice; must resolve to a regressor.
    /// * `model_t` - Treatment first-stage choice; must classify exactly when
    ///   the treatment is discrete.
    /// * `final_spec` - Linear product-basis mode or the weight-trick
    ///   reduction.
    /// * `discrete_treatment` - Whether T holds category labels.
    /// * `options` - Featurizer, intercept, fold and seed settings.
    pub fn new(
        model_y: NuisanceSpec,
        model_t: NuisanceSpec,
        final_spec: FinalSpec,
        discrete_treatment: bool,
        options: DmlOptions,
    ) -> Result<Self, OrthofitError> {
        let model_y = resolve_outcome(model_y, options.seed)?;
        let model_t = resolve_treatment(model_t, discrete_treatment, options.seed)?;
        let featurizer = options.featurizer.map(Arc::new);

        let effect_model: EffectModelFactory = match final_spec {
            FinalSpec::Linear(factory) => {
                let featurizer = featurizer.as_ref().map(Arc::clone);
                let fit_cate_intercept = options.fit_cate_intercept;
                Box::new(move || {
                    Box::new(LinearFinalStage::new(
                        factory(),
                        featurizer.as_ref().map(|f| f()),
                        fit_cate_intercept,
                    ))
                })
            }
            FinalSpec::WeightTrick { model, res_clip } => {
                if !(res_clip.is_finite() && res_clip > 0.0) {
                    return Err(OrthofitError::InvalidParameter(
                        "res_clip".to_string(),
                        "a positive number".to_string(),
                        res_clip.to_string(),
                    ));
                }
                let featurizer = featurizer.as_ref().map(Arc::clone);
                Box::new(move || {
                    let stage = WeightedFinalStage::new(
                        model(),
                        featurizer.as_ref().map(|f| f()),
                        res_clip,
                    )
                    .expect("res_clip validated at construction");
                    Box::new(stage)
                })
            }
        };

        let mut learner = RLearner::new(model_y, model_t, effect_model, discrete_treatment)?
            .set_linear_first_stages(options.linear_first_stages)
            .set_fold_spec(options.fold_spec)
            .set_seed(options.seed);
        if let Some(featurizer) = featurizer {
            learner = learner.set_featurizer(Box::new(move || featurizer()));
        }
        Ok(Dml { learner })
    }

    /// A Dml with an unpenalized linear final model; the CATE intercept is
    /// handled by the final-stage wrapper, not the model.
    pub fn linear(
        model_y: NuisanceSpec,
        model_t: NuisanceSpec,
        discrete_treatment: bool,
        options: DmlOptions,
    ) -> Result<Self, OrthofitError> {
        Self::new(
            model_y,
            model_t,
            FinalSpec::Linear(Box::new(|| Box::new(LinearRegression::new(false)))),
            discrete_treatment,
            options,
        )
    }

    /// A Dml with a debiased lasso final model, for high-dimensional effect
    /// features with valid standard errors.
    pub fn sparse_linear(
        model_y: NuisanceSpec,
        model_t: NuisanceSpec,
        discrete_treatment: bool,
        options: DmlOptions,
    ) -> Result<Self, OrthofitError> {
        let seed = options.seed;
        DebiasedLasso::new(None, false, seed)?;
        Self::new(
            model_y,
            model_t,
            FinalSpec::Linear(Box::new(move || {
                Box::new(
                    DebiasedLasso::new(None, false, seed)
                        .expect("parameters validated at construction"),
                )
            })),
            discrete_treatment,
            options,
        )
    }

    /// A Dml approximating a kernelized CATE: a random Fourier feature map
    /// as featurizer and a cross-validated lasso final model.
    ///
    /// * `dim` - Number of random features.
    /// * `bandwidth` - Kernel bandwidth of the approximated RBF kernel.
    pub fn kernel(
        model_y: NuisanceSpec,
        model_t: NuisanceSpec,
        discrete_treatment: bool,
        dim: usize,
        bandwidth: f64,
        mut options: DmlOptions,
    ) -> Result<Self, OrthofitError> {
        let seed = options.seed;
        RandomFourierFeatures::new(dim, bandwidth, seed)?;
        options.featurizer = Some(Box::new(move || {
            Box::new(
                RandomFourierFeatures::new(dim, bandwidth, seed)
                    .expect("parameters validated at construction"),
            )
        }));
        Self::new(
            model_y,
            model_t,
            FinalSpec::Linear(Box::new(move || Box::new(WeightedLassoCv::new(false, seed)))),
            discrete_treatment,
            options,
        )
    }

    /// A Dml in weight-trick mode around an arbitrary weighted regressor.
    /// Requires a single continuous or binary discrete treatment.
    pub fn non_parametric(
        model_y: NuisanceSpec,
        model_t: NuisanceSpec,
        model_final: RegressorFactory,
        discrete_treatment: bool,
        res_clip: f64,
        options: DmlOptions,
    ) -> Result<Self, OrthofitError> {
        Self::new(
            model_y,
            model_t,
            FinalSpec::WeightTrick {
                model: model_final,
                res_clip,
            },
            discrete_treatment,
            options,
        )
    }

    /// Fit the estimator on the given data.
    pub fn fit(&mut self, data: &CausalData) -> Result<(), OrthofitError> {
        self.learner.fit(data)
    }

    /// Constant marginal effect at the given features, `(n or 1, d_y, d_t)`.
    pub fn const_marginal_effect(
        &self,
        x: Option<&RowMajorMatrix>,
    ) -> Result<EffectTensor, OrthofitError> {
        self.learner.const_marginal_effect(x)
    }

    /// Effect of moving every row from treatment `t0` to `t1`.
    pub fn effect(
        &self,
        x: Option<&RowMajorMatrix>,
        t0: Option<&TreatmentSpec>,
        t1: &TreatmentSpec,
    ) -> Result<Target, OrthofitError> {
        self.learner.effect(x, t0, t1)
    }

    /// Average effect over the queried rows, one value per outcome column.
    pub fn ate(
        &self,
        x: Option<&RowMajorMatrix>,
        t0: Option<&TreatmentSpec>,
        t1: &TreatmentSpec,
    ) -> Result<Vec<f64>, OrthofitError> {
        self.learner.ate(x, t0, t1)
    }

    /// Score the fitted estimator on new data by residual mean squared
    /// error.
    pub fn score(&self, data: &CausalData) -> Result<f64, OrthofitError> {
        self.learner.score(data)
    }

    /// In-sample score recorded at fit time.
    pub fn training_score(&self) -> Option<f64> {
        self.learner.training_score()
    }

    /// Rows that received an out-of-fold prediction during the last fit.
    pub fn fitted_indices(&self) -> Result<&[usize], OrthofitError> {
        self.learner.fitted_indices()
    }

    /// Category values of a discrete treatment, in encoding order.
    pub fn treatment_categories(&self) -> Option<&[f64]> {
        self.learner.treatment_categories()
    }

    /// Per-fold fitted outcome first stages, in fold order.
    pub fn models_y(&self) -> Result<Vec<&FirstStage>, OrthofitError> {
        self.learner.models_y()
    }

    /// Per-fold fitted treatment first stages, in fold order.
    pub fn models_t(&self) -> Result<Vec<&FirstStage>, OrthofitError> {
        self.learner.models_t()
    }

    /// The fitted effect model.
    pub fn effect_model(&self) -> Result<&dyn EffectModel, OrthofitError> {
        self.learner.effect_model()
    }

    /// Names of the effect features, mapped through the featurizer when one
    /// is attached.
    pub fn cate_feature_names(
        &self,
        input_names: &[String],
    ) -> Result<Vec<String>, OrthofitError> {
        self.learner.cate_feature_names(input_names)
    }

    fn final_regressor(&self) -> Result<&dyn Regressor, OrthofitError> {
        self.effect_model()?.fitted_regressor().ok_or_else(|| {
            OrthofitError::MissingCapability(
                "the final stage does not wrap a regressor".to_string(),
            )
        })
    }

    /// Coefficients of the fitted final regressor over the crossed design,
    /// `(p, d_y)` with effect features varying fastest within each treatment
    /// block.
    pub fn coef(&self) -> Result<&RowMajorMatrix, OrthofitError> {
        self.final_regressor()?.coefficients().ok_or_else(|| {
            OrthofitError::MissingCapability(
                "the final model does not report coefficients".to_string(),
            )
        })
    }

    /// Intercepts of the fitted final regressor, one per outcome column.
    pub fn intercept(&self) -> Result<&[f64], OrthofitError> {
        self.final_regressor()?.intercepts().ok_or_else(|| {
            OrthofitError::MissingCapability(
                "the final model does not report intercepts".to_string(),
            )
        })
    }
}
