//! Encode
//!
//! One-hot encoding of discrete treatment labels, baseline dropped.
use crate::data::RowMajorMatrix;
use crate::errors::OrthofitError;
use serde::{Deserialize, Serialize};

/// One-hot encoder for a discrete treatment (or instrument).
///
/// Categories are the distinct observed values sorted ascending; the smallest
/// is the baseline and its indicator column is dropped, so `k` categories
/// encode to `k - 1` columns. The encoding is fixed at fit time and reapplied
/// verbatim for effect queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreatmentEncoder {
    categories: Vec<f64>,
}

impl TreatmentEncoder {
    /// Learn the category set from observed values.
    pub fn fit(values: &[f64]) -> Result<Self, OrthofitError> {
        if values.iter().any(|v| v.is_nan()) {
            return Err(OrthofitError::InvalidParameter(
                "treatment".to_string(),
                "finite category labels".to_string(),
                "NaN".to_string(),
            ));
        }
        let mut categories = values.to_vec();
        categories.sort_by(f64::total_cmp);
        categories.dedup();
        if categories.len() < 2 {
            return Err(OrthofitError::Configuration(
                "discrete treatment must take at least two distinct values".to_string(),
            ));
        }
        Ok(TreatmentEncoder { categories })
    }

    /// Number of observed categories.
    pub fn n_categories(&self) -> usize {
        self.categories.len()
    }

    /// The observed categories, ascending; the first is the baseline.
    pub fn categories(&self) -> &[f64] {
        &self.categories
    }

    /// Category index of a single value.
    pub fn label_of(&self, value: f64) -> Result<usize, OrthofitError> {
        self.categories
            .binary_search_by(|c| c.total_cmp(&value))
            .map_err(|_| {
                OrthofitError::Configuration(format!(
                    "treatment value {value} was not observed during fit"
                ))
            })
    }

    /// Category indices for a slice of values.
    pub fn labels(&self, values: &[f64]) -> Result<Vec<usize>, OrthofitError> {
        values.iter().map(|&v| self.label_of(v)).collect()
    }

    /// One-hot encode raw values into an `(n, k - 1)` matrix with the
    /// baseline column dropped.
    pub fn onehot(&self, values: &[f64]) -> Result<RowMajorMatrix, OrthofitError> {
        Ok(self.onehot_from_labels(&self.labels(values)?))
    }

    /// One-hot encode category indices, baseline column dropped.
    pub fn onehot_from_labels(&self, labels: &[usize]) -> RowMajorMatrix {
        let d = self.categories.len() - 1;
        let mut out = RowMajorMatrix::zeros(labels.len(), d);
        for (i, &label) in labels.iter().enumerate() {
            if label > 0 {
                out.set(i, label - 1, 1.0);
            }
        }
        out
    }
}

/// Recover category indices from a baseline-dropped one-hot matrix: an
/// all-zero row is the baseline, otherwise the set column plus one.
pub fn inverse_onehot(onehot: &RowMajorMatrix) -> Vec<usize> {
    (0..onehot.rows)
        .map(|i| {
            let row = onehot.row(i);
            match row.iter().position(|&v| v != 0.0) {
                Some(j) => j + 1,
                None => 0,
            }
        })
        .collect()
}
