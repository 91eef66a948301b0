//! Data
//!
//! Owned matrix and shape-tracking containers shared by the estimators.
use crate::errors::OrthofitError;
use serde::{Deserialize, Serialize};

/// Dense matrix stored in row-major order.
///
/// Row access is the dominant pattern during cross-fitting (fold slicing,
/// per-row prediction), so rows are contiguous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowMajorMatrix {
    /// The raw data in row-major order.
    pub data: Vec<f64>,
    /// Number of rows.
    pub rows: usize,
    /// Number of columns.
    pub cols: usize,
}

impl RowMajorMatrix {
    /// Create a new RowMajorMatrix.
    pub fn new(data: Vec<f64>, rows: usize, cols: usize) -> Self {
        debug_assert_eq!(data.len(), rows * cols);
        RowMajorMatrix { data, rows, cols }
    }

    /// Matrix of zeros.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        RowMajorMatrix {
            data: vec![0.0; rows * cols],
            rows,
            cols,
        }
    }

    /// Matrix of ones.
    pub fn ones(rows: usize, cols: usize) -> Self {
        RowMajorMatrix {
            data: vec![1.0; rows * cols],
            rows,
            cols,
        }
    }

    /// Build a single-column matrix from a vector.
    pub fn from_vec(values: Vec<f64>) -> Self {
        let rows = values.len();
        RowMajorMatrix {
            data: values,
            rows,
            cols: 1,
        }
    }

    /// Get a single item in the matrix.
    ///
    /// * `i` - The ith row of the data to get.
    /// * `j` - The jth column of the data to get.
    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.cols + j]
    }

    /// Set a single item in the matrix.
    pub fn set(&mut self, i: usize, j: usize, value: f64) {
        self.data[i * self.cols + j] = value;
    }

    /// Get a row of the matrix as a slice.
    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    /// Get a column of the matrix as a new vector.
    pub fn column(&self, j: usize) -> Vec<f64> {
        (0..self.rows).map(|i| self.get(i, j)).collect()
    }

    /// Select a subset of rows, in the order given by `index`.
    pub fn take_rows(&self, index: &[usize]) -> RowMajorMatrix {
        let mut data = Vec::with_capacity(index.len() * self.cols);
        for &i in index {
            data.extend_from_slice(self.row(i));
        }
        RowMajorMatrix::new(data, index.len(), self.cols)
    }
}

/// An outcome or treatment array as supplied by the caller.
///
/// The original shape is remembered so that effect queries can hand back a
/// flat vector when a flat vector went in.
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    /// A flat `(n,)` array.
    Vector(Vec<f64>),
    /// An `(n, d)` array.
    Matrix(RowMajorMatrix),
}

impl Target {
    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        match self {
            Target::Vector(v) => v.len(),
            Target::Matrix(m) => m.rows,
        }
    }

    /// Number of columns (1 for a flat vector).
    pub fn n_cols(&self) -> usize {
        match self {
            Target::Vector(_) => 1,
            Target::Matrix(m) => m.cols,
        }
    }

    /// Whether the caller supplied a flat vector.
    pub fn is_vector(&self) -> bool {
        matches!(self, Target::Vector(_))
    }

    /// View the data as an `(n, d)` matrix, copying a vector into one column.
    pub fn to_matrix(&self) -> RowMajorMatrix {
        match self {
            Target::Vector(v) => RowMajorMatrix::from_vec(v.clone()),
            Target::Matrix(m) => m.clone(),
        }
    }

    /// Wrap a matrix, squeezing a single column back to a vector when the
    /// original input was a vector.
    pub fn from_matrix(matrix: RowMajorMatrix, squeeze: bool) -> Target {
        if squeeze && matrix.cols == 1 {
            Target::Vector(matrix.data)
        } else {
            Target::Matrix(matrix)
        }
    }

    /// The underlying values in row-major order.
    pub fn values(&self) -> &[f64] {
        match self {
            Target::Vector(v) => v,
            Target::Matrix(m) => &m.data,
        }
    }
}

impl From<Vec<f64>> for Target {
    fn from(values: Vec<f64>) -> Self {
        Target::Vector(values)
    }
}

impl From<RowMajorMatrix> for Target {
    fn from(matrix: RowMajorMatrix) -> Self {
        Target::Matrix(matrix)
    }
}

/// Per-treatment effects for a batch of rows, shaped `(n, d_y, d_t)`.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectTensor {
    /// Values in row-major `(n, d_y, d_t)` order.
    pub data: Vec<f64>,
    /// Number of rows.
    pub n: usize,
    /// Number of outcome columns.
    pub d_y: usize,
    /// Number of treatment columns.
    pub d_t: usize,
}

impl EffectTensor {
    /// Create a new EffectTensor.
    pub fn new(data: Vec<f64>, n: usize, d_y: usize, d_t: usize) -> Self {
        debug_assert_eq!(data.len(), n * d_y * d_t);
        EffectTensor { data, n, d_y, d_t }
    }

    /// Tensor of zeros.
    pub fn zeros(n: usize, d_y: usize, d_t: usize) -> Self {
        EffectTensor {
            data: vec![0.0; n * d_y * d_t],
            n,
            d_y,
            d_t,
        }
    }

    /// Effect of treatment column `k` on outcome column `j` for row `i`.
    pub fn get(&self, i: usize, j: usize, k: usize) -> f64 {
        self.data[(i * self.d_y + j) * self.d_t + k]
    }

    /// Set a single entry.
    pub fn set(&mut self, i: usize, j: usize, k: usize, value: f64) {
        self.data[(i * self.d_y + j) * self.d_t + k] = value;
    }

    /// Contract the treatment dimension against per-row treatment vectors,
    /// producing an `(n, d_y)` matrix.
    ///
    /// * `t` - An `(n, d_t)` matrix of treatment offsets or residuals.
    pub fn contract_treatment(&self, t: &RowMajorMatrix) -> RowMajorMatrix {
        debug_assert_eq!(t.rows, self.n);
        debug_assert_eq!(t.cols, self.d_t);
        let mut out = RowMajorMatrix::zeros(self.n, self.d_y);
        for i in 0..self.n {
            for j in 0..self.d_y {
                let mut acc = 0.0;
                for k in 0..self.d_t {
                    acc += self.get(i, j, k) * t.get(i, k);
                }
                out.set(i, j, acc);
            }
        }
        out
    }
}

/// A treatment setting for effect queries, broadcastable across rows.
///
/// When the treatment is discrete the values are raw category labels, not
/// one-hot columns; encoding happens inside the estimator.
#[derive(Debug, Clone)]
pub enum TreatmentSpec {
    /// The same value for every queried row.
    Scalar(f64),
    /// One value per row, for a single-column treatment.
    PerRow(Vec<f64>),
    /// Full `(n, d_t)` treatment rows.
    Rows(RowMajorMatrix),
}

impl TreatmentSpec {
    /// The number of rows pinned down by this spec, if any.
    pub fn n_rows(&self) -> Option<usize> {
        match self {
            TreatmentSpec::Scalar(_) => None,
            TreatmentSpec::PerRow(v) => Some(v.len()),
            TreatmentSpec::Rows(m) => Some(m.rows),
        }
    }
}

impl From<f64> for TreatmentSpec {
    fn from(value: f64) -> Self {
        TreatmentSpec::Scalar(value)
    }
}

impl From<Vec<f64>> for TreatmentSpec {
    fn from(values: Vec<f64>) -> Self {
        TreatmentSpec::PerRow(values)
    }
}

/// The caller-supplied `(Y, T, X, W, Z)` arrays for `fit` and `score`.
///
/// Y and T keep their original vector-or-matrix shape so query results can
/// be squeezed back to match.
#[derive(Debug, Clone)]
pub struct CausalData {
    /// Outcome.
    pub y: Target,
    /// Treatment; raw category labels when the treatment is discrete.
    pub t: Target,
    /// Effect-modifying features.
    pub x: Option<RowMajorMatrix>,
    /// Controls.
    pub w: Option<RowMajorMatrix>,
    /// Instrument.
    pub z: Option<Target>,
    /// Per-sample weights.
    pub sample_weight: Option<Vec<f64>>,
    /// Per-sample outcome variances.
    pub sample_var: Option<Vec<f64>>,
}

impl CausalData {
    /// Create a new CausalData holding only outcome and treatment.
    pub fn new(y: impl Into<Target>, t: impl Into<Target>) -> Self {
        CausalData {
            y: y.into(),
            t: t.into(),
            x: None,
            w: None,
            z: None,
            sample_weight: None,
            sample_var: None,
        }
    }

    /// Set the effect-modifying features.
    pub fn set_x(mut self, x: RowMajorMatrix) -> Self {
        self.x = Some(x);
        self
    }

    /// Set the controls.
    pub fn set_w(mut self, w: RowMajorMatrix) -> Self {
        self.w = Some(w);
        self
    }

    /// Set the instrument.
    pub fn set_z(mut self, z: impl Into<Target>) -> Self {
        self.z = Some(z.into());
        self
    }

    /// Set per-sample weights.
    pub fn set_sample_weight(mut self, sample_weight: Vec<f64>) -> Self {
        self.sample_weight = Some(sample_weight);
        self
    }

    /// Set per-sample outcome variances.
    pub fn set_sample_var(mut self, sample_var: Vec<f64>) -> Self {
        self.sample_var = Some(sample_var);
        self
    }

    /// Number of rows in the outcome.
    pub fn n_rows(&self) -> usize {
        self.y.n_rows()
    }

    /// Check that every present array matches the outcome row count.
    pub fn validate(&self) -> Result<(), OrthofitError> {
        let n = self.y.n_rows();
        let check = |name: &str, rows: usize| -> Result<(), OrthofitError> {
            if rows != n {
                Err(OrthofitError::RowCountMismatch(name.to_string(), rows, n))
            } else {
                Ok(())
            }
        };
        check("T", self.t.n_rows())?;
        if let Some(x) = &self.x {
            check("X", x.rows)?;
        }
        if let Some(w) = &self.w {
            check("W", w.rows)?;
        }
        if let Some(z) = &self.z {
            check("Z", z.n_rows())?;
        }
        if let Some(sw) = &self.sample_weight {
            check("sample_weight", sw.len())?;
        }
        if let Some(sv) = &self.sample_var {
            check("sample_var", sv.len())?;
        }
        Ok(())
    }
}

/// The `(Y, T, X, W, Z)` arrays for one fit, with optional per-sample weight
/// and variance, all sharing the same row count.
#[derive(Debug, Clone)]
pub struct SampleBundle {
    /// Outcome, `(n, d_y)`.
    pub y: RowMajorMatrix,
    /// Treatment, `(n, d_t)`; one-hot encoded when the treatment is discrete.
    pub t: RowMajorMatrix,
    /// Effect-modifying features.
    pub x: Option<RowMajorMatrix>,
    /// Controls.
    pub w: Option<RowMajorMatrix>,
    /// Instrument.
    pub z: Option<RowMajorMatrix>,
    /// Per-sample weights.
    pub sample_weight: Option<Vec<f64>>,
    /// Per-sample outcome variances.
    pub sample_var: Option<Vec<f64>>,
}

impl SampleBundle {
    /// Number of rows shared by every array in the bundle.
    pub fn n_rows(&self) -> usize {
        self.y.rows
    }

    /// Check that every present array matches the outcome row count.
    pub fn validate(&self) -> Result<(), OrthofitError> {
        let n = self.y.rows;
        let check = |name: &str, rows: usize| -> Result<(), OrthofitError> {
            if rows != n {
                Err(OrthofitError::RowCountMismatch(name.to_string(), rows, n))
            } else {
                Ok(())
            }
        };
        check("T", self.t.rows)?;
        if let Some(x) = &self.x {
            check("X", x.rows)?;
        }
        if let Some(w) = &self.w {
            check("W", w.rows)?;
        }
        if let Some(z) = &self.z {
            check("Z", z.rows)?;
        }
        if let Some(sw) = &self.sample_weight {
            check("sample_weight", sw.len())?;
        }
        if let Some(sv) = &self.sample_var {
            check("sample_var", sv.len())?;
        }
        Ok(())
    }

    /// Restrict every array in the bundle to the given rows.
    pub fn take_rows(&self, index: &[usize]) -> SampleBundle {
        SampleBundle {
            y: self.y.take_rows(index),
            t: self.t.take_rows(index),
            x: self.x.as_ref().map(|m| m.take_rows(index)),
            w: self.w.as_ref().map(|m| m.take_rows(index)),
            z: self.z.as_ref().map(|m| m.take_rows(index)),
            sample_weight: self
                .sample_weight
                .as_ref()
                .map(|v| index.iter().map(|&i| v[i]).collect()),
            sample_var: self
                .sample_var
                .as_ref()
                .map(|v| index.iter().map(|&i| v[i]).collect()),
        }
    }
}
