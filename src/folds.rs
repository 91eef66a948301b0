//! Folds
//!
//! Train/test index partitions for cross-fitting. Folds are either built from
//! an integer count (shuffled, stratified on treatment labels when the
//! treatment is discrete) or supplied verbatim by the caller.
use crate::errors::OrthofitError;
use hashbrown::HashMap;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// One train/test split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fold {
    /// Row indices used to fit the fold's nuisance model.
    pub train: Vec<usize>,
    /// Row indices receiving out-of-fold predictions.
    pub test: Vec<usize>,
}

/// How folds are produced for a fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum FoldSpec {
    /// Build `k` shuffled folds, stratified when the treatment is discrete.
    KFolds(usize),
    /// Use the given folds verbatim. Pre-built external splitters feed their
    /// output in through this variant.
    Explicit(Vec<Fold>),
}

impl Default for FoldSpec {
    fn default() -> Self {
        FoldSpec::KFolds(2)
    }
}

/// Materialize a fold specification.
///
/// * `n` - Number of rows.
/// * `labels` - Treatment category per row when the treatment is discrete;
///   folds are stratified on these.
/// * `sample_weight` - Optional weights; stratified allocation balances the
///   accumulated weight per category instead of the count.
/// * `seed` - Seed for the shuffle.
pub fn build_folds(
    spec: &FoldSpec,
    n: usize,
    labels: Option<&[usize]>,
    sample_weight: Option<&[f64]>,
    seed: u64,
) -> Result<Vec<Fold>, OrthofitError> {
    match spec {
        FoldSpec::Explicit(folds) => Ok(folds.clone()),
        FoldSpec::KFolds(k) => {
            let k = *k;
            if k < 2 {
                return Err(OrthofitError::InvalidParameter(
                    "cv".to_string(),
                    "an integer of at least 2".to_string(),
                    k.to_string(),
                ));
            }
            if k > n {
                return Err(OrthofitError::InvalidParameter(
                    "cv".to_string(),
                    format!("at most the number of samples ({n})"),
                    k.to_string(),
                ));
            }
            let mut rng = StdRng::seed_from_u64(seed);
            let assignment = match labels {
                Some(labels) => stratified_assignment(k, labels, sample_weight, &mut rng)?,
                None => shuffled_assignment(k, n, &mut rng),
            };
            Ok(folds_from_assignment(k, &assignment))
        }
    }
}

/// Plain shuffled k-fold: shuffle the indices once, then cut them into k
/// contiguous test blocks whose sizes differ by at most one.
fn shuffled_assignment(k: usize, n: usize, rng: &mut StdRng) -> Vec<usize> {
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(rng);
    let base = n / k;
    let extra = n % k;
    let mut assignment = vec![0usize; n];
    let mut offset = 0;
    for fold in 0..k {
        let size = base + usize::from(fold < extra);
        for &row in &order[offset..offset + size] {
            assignment[row] = fold;
        }
        offset += size;
    }
    assignment
}

/// Stratified k-fold: within each category, hand shuffled members to the fold
/// whose accumulated category weight is smallest. With unit weights this is a
/// round-robin, so omitting weights and passing all-ones weights produce the
/// same folds.
fn stratified_assignment(
    k: usize,
    labels: &[usize],
    sample_weight: Option<&[f64]>,
    rng: &mut StdRng,
) -> Result<Vec<usize>, OrthofitError> {
    let mut groups: HashMap<usize, Vec<usize>> = HashMap::new();
    for (row, &label) in labels.iter().enumerate() {
        groups.entry(label).or_default().push(row);
    }
    let mut keys: Vec<usize> = groups.keys().copied().collect();
    keys.sort_unstable();

    let mut assignment = vec![0usize; labels.len()];
    for label in keys {
        let members = groups.get_mut(&label).map(std::mem::take).unwrap_or_default();
        if members.len() < 2 {
            return Err(OrthofitError::Configuration(format!(
                "treatment category {label} has {} sample(s); every category needs at least two for stratified folds",
                members.len()
            )));
        }
        let mut members = members;
        members.shuffle(rng);
        let mut fold_weight = vec![0.0f64; k];
        for row in members {
            let target = fold_weight
                .iter()
                .enumerate()
                .min_by(|a, b| a.1.total_cmp(b.1))
                .map(|(fold, _)| fold)
                .unwrap_or(0);
            assignment[row] = target;
            fold_weight[target] += sample_weight.map_or(1.0, |w| w[row]);
        }
    }
    Ok(assignment)
}

fn folds_from_assignment(k: usize, assignment: &[usize]) -> Vec<Fold> {
    let mut folds: Vec<Fold> = (0..k)
        .map(|_| Fold {
            train: Vec::new(),
            test: Vec::new(),
        })
        .collect();
    for (row, &fold) in assignment.iter().enumerate() {
        for (f, out) in folds.iter_mut().enumerate() {
            if f == fold {
                out.test.push(row);
            } else {
                out.train.push(row);
            }
        }
    }
    folds
}

/// Check the structural invariants of a fold set and return the sorted union
/// of all test indices.
///
/// Within a fold, train and test must be disjoint; across folds, no index may
/// appear in two test sets. Rows missing from every test set are allowed here
/// and reported through the returned union being shorter than `n`.
pub fn validate_folds(folds: &[Fold], n: usize) -> Result<Vec<usize>, OrthofitError> {
    if folds.is_empty() {
        return Err(OrthofitError::InvalidFolds(
            "at least one fold is required".to_string(),
        ));
    }
    let mut in_test = vec![false; n];
    for (f, fold) in folds.iter().enumerate() {
        let mut in_train = vec![false; n];
        for &i in &fold.train {
            if i >= n {
                return Err(OrthofitError::InvalidFolds(format!(
                    "index {i} in fold {f} is out of bounds for {n} rows"
                )));
            }
            in_train[i] = true;
        }
        for &i in &fold.test {
            if i >= n {
                return Err(OrthofitError::InvalidFolds(format!(
                    "index {i} in fold {f} is out of bounds for {n} rows"
                )));
            }
            if in_train[i] {
                return Err(OrthofitError::InvalidFolds(format!(
                    "train and test indices of fold {f} are not disjoint"
                )));
            }
            if in_test[i] {
                return Err(OrthofitError::InvalidFolds(format!(
                    "index {i} appears in the test set of two folds"
                )));
            }
            in_test[i] = true;
        }
    }
    Ok((0..n).filter(|&i| in_test[i]).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn coverage(folds: &[Fold], n: usize) -> Vec<usize> {
        let mut counts = vec![0usize; n];
        for fold in folds {
            for &i in &fold.test {
                counts[i] += 1;
            }
        }
        counts
    }

    #[test]
    fn test_kfold_exact_coverage() {
        for n in [7usize, 10, 23] {
            for k in 2..=5usize {
                if k > n {
                    continue;
                }
                let folds = build_folds(&FoldSpec::KFolds(k), n, None, None, 42).unwrap();
                assert_eq!(folds.len(), k);
                let counts = coverage(&folds, n);
                assert!(
                    counts.iter().all(|&c| c == 1),
                    "every index must be in exactly one test set (n={n}, k={k})"
                );
                for fold in &folds {
                    assert_eq!(fold.train.len() + fold.test.len(), n);
                }
            }
        }
    }

    #[test]
    fn test_kfold_deterministic_per_seed() {
        let a = build_folds(&FoldSpec::KFolds(3), 30, None, None, 7).unwrap();
        let b = build_folds(&FoldSpec::KFolds(3), 30, None, None, 7).unwrap();
        assert_eq!(a, b);
        let c = build_folds(&FoldSpec::KFolds(3), 30, None, None, 8).unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_stratified_balance() {
        // 12 of category 0, 6 of category 1, three folds.
        let labels: Vec<usize> = (0..18).map(|i| usize::from(i % 3 == 0)).collect();
        let folds = build_folds(&FoldSpec::KFolds(3), 18, Some(&labels), None, 1).unwrap();
        let counts = coverage(&folds, 18);
        assert!(counts.iter().all(|&c| c == 1));
        for fold in &folds {
            let ones = fold.test.iter().filter(|&&i| labels[i] == 1).count();
            assert_eq!(ones, 2, "each test fold holds a third of category 1");
            assert_eq!(fold.test.len(), 6);
        }
    }

    #[test]
    fn test_stratified_weight_balance() {
        // One heavy sample per category; heavy samples should land in
        // different folds than where the weight already accumulated.
        let labels = vec![0usize; 8];
        let weights = vec![1.0, 1.0, 1.0, 1.0, 5.0, 1.0, 1.0, 1.0];
        let folds = build_folds(&FoldSpec::KFolds(2), 8, Some(&labels), Some(&weights), 3).unwrap();
        let mut fold_weight = [0.0f64; 2];
        for (f, fold) in folds.iter().enumerate() {
            for &i in &fold.test {
                fold_weight[f] += weights[i];
            }
        }
        // Total weight 12; the greedy allocation keeps the split within the
        // heavy sample's weight of even.
        assert!((fold_weight[0] - fold_weight[1]).abs() <= 5.0);
        assert!(coverage(&folds, 8).iter().all(|&c| c == 1));
    }

    #[test]
    fn test_unweighted_matches_unit_weights() {
        let labels: Vec<usize> = (0..20).map(|i| i % 2).collect();
        let ones = vec![1.0; 20];
        let a = build_folds(&FoldSpec::KFolds(4), 20, Some(&labels), None, 11).unwrap();
        let b = build_folds(&FoldSpec::KFolds(4), 20, Some(&labels), Some(&ones), 11).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_bad_fold_count() {
        assert!(build_folds(&FoldSpec::KFolds(1), 10, None, None, 0).is_err());
        assert!(build_folds(&FoldSpec::KFolds(11), 10, None, None, 0).is_err());
    }

    #[test]
    fn test_singleton_category_rejected() {
        let labels = vec![0, 0, 0, 0, 1];
        let err = build_folds(&FoldSpec::KFolds(2), 5, Some(&labels), None, 0).unwrap_err();
        assert!(matches!(err, OrthofitError::Configuration(_)));
    }

    #[test]
    fn test_explicit_used_verbatim() {
        let folds = vec![
            Fold {
                train: vec![2, 3],
                test: vec![0, 1],
            },
            Fold {
                train: vec![0, 1],
                test: vec![2, 3],
            },
        ];
        let built = build_folds(&FoldSpec::Explicit(folds.clone()), 4, None, None, 0).unwrap();
        assert_eq!(built, folds);
    }

    #[test]
    fn test_validate_folds_errors() {
        let overlap = vec![Fold {
            train: vec![0, 1],
            test: vec![1, 2],
        }];
        assert!(matches!(
            validate_folds(&overlap, 3),
            Err(OrthofitError::InvalidFolds(_))
        ));

        let duplicated = vec![
            Fold {
                train: vec![2],
                test: vec![0, 1],
            },
            Fold {
                train: vec![0],
                test: vec![1, 2],
            },
        ];
        assert!(matches!(
            validate_folds(&duplicated, 3),
            Err(OrthofitError::InvalidFolds(_))
        ));

        let out_of_bounds = vec![Fold {
            train: vec![0],
            test: vec![5],
        }];
        assert!(validate_folds(&out_of_bounds, 3).is_err());
    }

    #[test]
    fn test_validate_folds_reports_partial_coverage() {
        let folds = vec![Fold {
            train: vec![2, 3],
            test: vec![0, 1],
        }];
        let fitted = validate_folds(&folds, 4).unwrap();
        assert_eq!(fitted, vec![0, 1]);
    }
}
