//! Cross-fit Executor
//!
//! Fits one nuisance model per fold on the fold's training rows and scatters
//! its held-out predictions into full-length arrays. Folds are independent,
//! so they run as parallel tasks on the rayon pool; the scatter is ordered by
//! test index, never by fold completion order.
use rayon::prelude::*;

use crate::data::{RowMajorMatrix, SampleBundle};
use crate::errors::OrthofitError;
use crate::folds::{validate_folds, Fold};
use crate::ortho::{NuisanceFactory, NuisanceModel};
use crate::utils::tile_rows;

/// Everything produced by one cross-fitting pass.
pub struct CrossFitResult {
    /// Out-of-fold nuisance arrays, one row per input row. Rows outside
    /// `fitted_indices` were never predicted and must be sliced away before
    /// the final stage sees them.
    pub nuisances: Vec<RowMajorMatrix>,
    /// One fitted nuisance model per fold, in fold order.
    pub models: Vec<Box<dyn NuisanceModel>>,
    /// Sorted union of all test indices.
    pub fitted_indices: Vec<usize>,
}

/// Every training split must contain each treatment category, or the fold's
/// classifier would meet unseen categories at prediction time. The encoded
/// treatment has one column per non-baseline category; a baseline row is all
/// zeros.
fn check_category_coverage(folds: &[Fold], t: &RowMajorMatrix) -> Result<(), OrthofitError> {
    for (f, fold) in folds.iter().enumerate() {
        let mut seen_baseline = false;
        let mut seen = vec![false; t.cols];
        for &i in &fold.train {
            let mut any = false;
            for j in 0..t.cols {
                if t.get(i, j) == 1.0 {
                    seen[j] = true;
                    any = true;
                }
            }
            if !any {
                seen_baseline = true;
            }
        }
        if !seen_baseline {
            return Err(OrthofitError::MissingTreatmentCategory(f, 0));
        }
        if let Some(j) = seen.iter().position(|s| !s) {
            return Err(OrthofitError::MissingTreatmentCategory(f, j + 1));
        }
    }
    Ok(())
}

/// Run cross-fitting: validate the folds, fit a fresh nuisance model per
/// fold, and assemble full-length out-of-fold nuisance arrays.
///
/// * `factory` - Builds one fresh nuisance model per fold.
/// * `folds` - The fold set; structural violations are fatal.
/// * `data` - The working bundle, treatment already encoded.
/// * `discrete_treatment` - Enables the per-fold category coverage check.
pub fn crossfit(
    factory: &NuisanceFactory,
    folds: &[Fold],
    data: &SampleBundle,
    discrete_treatment: bool,
) -> Result<CrossFitResult, OrthofitError> {
    let n = data.n_rows();
    let fitted_indices = validate_folds(folds, n)?;
    if discrete_treatment {
        check_category_coverage(folds, &data.t)?;
    }

    let per_fold: Vec<(Box<dyn NuisanceModel>, Vec<RowMajorMatrix>)> = folds
        .par_iter()
        .map(|fold| {
            let mut model = factory();
            model.fit(&data.take_rows(&fold.train))?;
            let mut preds = model.predict(&data.take_rows(&fold.test))?;
            for m in preds.iter_mut() {
                if m.rows == 1 && fold.test.len() > 1 {
                    // A featureless nuisance model returns one aggregate row.
                    *m = tile_rows(m, fold.test.len());
                }
            }
            for m in &preds {
                if m.rows != fold.test.len() {
                    return Err(OrthofitError::Configuration(format!(
                        "nuisance predictions have {} rows for a test split of {}",
                        m.rows,
                        fold.test.len()
                    )));
                }
            }
            Ok((model, preds))
        })
        .collect::<Result<Vec<_>, OrthofitError>>()?;

    // All folds must agree on the number and width of nuisance outputs.
    let widths: Vec<usize> = per_fold[0].1.iter().map(|m| m.cols).collect();
    for (_, preds) in &per_fold {
        if preds.len() != widths.len() || preds.iter().zip(&widths).any(|(m, &w)| m.cols != w) {
            return Err(OrthofitError::Configuration(
                "nuisance output shapes differ across folds".to_string(),
            ));
        }
    }

    let mut nuisances: Vec<RowMajorMatrix> = widths
        .iter()
        .map(|&w| RowMajorMatrix::zeros(n, w))
        .collect();
    let mut models = Vec::with_capacity(folds.len());
    for (fold, (model, preds)) in folds.iter().zip(per_fold) {
        for (out, pred) in nuisances.iter_mut().zip(&preds) {
            for (r, &i) in fold.test.iter().enumerate() {
                for j in 0..pred.cols {
                    out.set(i, j, pred.get(r, j));
                }
            }
        }
        models.push(model);
    }

    Ok(CrossFitResult {
        nuisances,
        models,
        fitted_indices,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn bundle(y: Vec<f64>, t: Vec<f64>) -> SampleBundle {
        SampleBundle {
            y: RowMajorMatrix::from_vec(y),
            t: RowMajorMatrix::from_vec(t),
            x: None,
            w: None,
            z: None,
            sample_weight: None,
            sample_var: None,
        }
    }

    /// Returns the raw test targets, so the scatter can be checked exactly.
    struct EchoNuisance;

    impl NuisanceModel for EchoNuisance {
        fn fit(&mut self, _data: &SampleBundle) -> Result<(), OrthofitError> {
            Ok(())
        }

        fn predict(&self, data: &SampleBundle) -> Result<Vec<RowMajorMatrix>, OrthofitError> {
            Ok(vec![data.y.clone()])
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    /// Fits the training mean and predicts it as a single aggregate row.
    struct MeanNuisance {
        mean: f64,
    }

    impl NuisanceModel for MeanNuisance {
        fn fit(&mut self, data: &SampleBundle) -> Result<(), OrthofitError> {
            let n = data.n_rows() as f64;
            self.mean = data.y.data.iter().sum::<f64>() / n;
            Ok(())
        }

        fn predict(&self, _data: &SampleBundle) -> Result<Vec<RowMajorMatrix>, OrthofitError> {
            Ok(vec![RowMajorMatrix::from_vec(vec![self.mean])])
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct VariableArity {
        outputs: usize,
    }

    impl NuisanceModel for VariableArity {
        fn fit(&mut self, _data: &SampleBundle) -> Result<(), OrthofitError> {
            Ok(())
        }

        fn predict(&self, data: &SampleBundle) -> Result<Vec<RowMajorMatrix>, OrthofitError> {
            Ok((0..self.outputs).map(|_| data.y.clone()).collect())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    struct FailingNuisance;

    impl NuisanceModel for FailingNuisance {
        fn fit(&mut self, _data: &SampleBundle) -> Result<(), OrthofitError> {
            Err(OrthofitError::Computation("nuisance fit failed".to_string()))
        }

        fn predict(&self, _data: &SampleBundle) -> Result<Vec<RowMajorMatrix>, OrthofitError> {
            Ok(Vec::new())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn two_folds() -> Vec<Fold> {
        vec![
            Fold {
                train: vec![3, 4, 5],
                test: vec![0, 1, 2],
            },
            Fold {
                train: vec![0, 1, 2],
                test: vec![3, 4, 5],
            },
        ]
    }

    #[test]
    fn test_scatter_by_test_index() {
        let data = bundle(
            vec![10.0, 11.0, 12.0, 13.0, 14.0, 15.0],
            vec![0.0; 6],
        );
        // Shuffled test order inside the folds must not matter.
        let folds = vec![
            Fold {
                train: vec![0, 2, 4],
                test: vec![5, 1, 3],
            },
            Fold {
                train: vec![1, 3, 5],
                test: vec![2, 0, 4],
            },
        ];
        let factory: NuisanceFactory = Box::new(|| Box::new(EchoNuisance));
        let result = crossfit(&factory, &folds, &data, false).unwrap();
        assert_eq!(result.nuisances.len(), 1);
        assert_eq!(result.nuisances[0].data, data.y.data);
        assert_eq!(result.models.len(), 2);
        assert_eq!(result.fitted_indices, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_single_row_prediction_is_tiled() {
        let data = bundle(vec![1.0, 1.0, 1.0, 5.0, 5.0, 5.0], vec![0.0; 6]);
        let factory: NuisanceFactory = Box::new(|| Box::new(MeanNuisance { mean: 0.0 }));
        let result = crossfit(&factory, &two_folds(), &data, false).unwrap();
        // Fold 0 trains on the 5.0 block, so rows 0..3 get its mean.
        for i in 0..3 {
            assert_eq!(result.nuisances[0].get(i, 0), 5.0);
        }
        for i in 3..6 {
            assert_eq!(result.nuisances[0].get(i, 0), 1.0);
        }
    }

    #[test]
    fn test_arity_mismatch_across_folds() {
        let data = bundle(vec![0.0; 6], vec![0.0; 6]);
        let counter = Arc::new(AtomicUsize::new(0));
        let factory: NuisanceFactory = Box::new(move || {
            let outputs = 1 + counter.fetch_add(1, Ordering::SeqCst) % 2;
            Box::new(VariableArity { outputs })
        });
        assert!(matches!(
            crossfit(&factory, &two_folds(), &data, false),
            Err(OrthofitError::Configuration(_))
        ));
    }

    #[test]
    fn test_fold_failure_propagates() {
        let data = bundle(vec![0.0; 6], vec![0.0; 6]);
        let factory: NuisanceFactory = Box::new(|| Box::new(FailingNuisance));
        assert!(matches!(
            crossfit(&factory, &two_folds(), &data, false),
            Err(OrthofitError::Computation(_))
        ));
    }

    #[test]
    fn test_missing_category_detected_before_fitting() {
        // Categories {0, 1, 2}; the only category-2 example is row 5, so
        // fold 1 (training on rows 0..3) never sees it.
        let t = RowMajorMatrix::new(
            vec![
                0.0, 0.0, // cat 0
                1.0, 0.0, // cat 1
                0.0, 0.0, // cat 0
                0.0, 0.0, // cat 0
                1.0, 0.0, // cat 1
                0.0, 1.0, // cat 2
            ],
            6,
            2,
        );
        let data = SampleBundle {
            y: RowMajorMatrix::from_vec(vec![0.0; 6]),
            t,
            x: None,
            w: None,
            z: None,
            sample_weight: None,
            sample_var: None,
        };
        let factory: NuisanceFactory = Box::new(|| Box::new(FailingNuisance));
        match crossfit(&factory, &two_folds(), &data, true).err() {
            Some(OrthofitError::MissingTreatmentCategory(fold, category)) => {
                assert_eq!((fold, category), (1, 2));
            }
            other => panic!("expected a missing-category error, got {other:?}"),
        }
    }

    #[test]
    fn test_overlapping_fold_rejected() {
        let data = bundle(vec![0.0; 6], vec![0.0; 6]);
        let folds = vec![Fold {
            train: vec![0, 1, 2, 3],
            test: vec![3, 4, 5],
        }];
        let factory: NuisanceFactory = Box::new(|| Box::new(EchoNuisance));
        assert!(matches!(
            crossfit(&factory, &folds, &data, false),
            Err(OrthofitError::InvalidFolds(_))
        ));
    }
}
