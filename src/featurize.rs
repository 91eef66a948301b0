//! Featurize
//!
//! Feature maps applied to X before first-stage expansion or the final-stage
//! design matrix.
use crate::data::RowMajorMatrix;
use crate::errors::OrthofitError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

/// A feature map with a fit/transform lifecycle.
///
/// The map is fit once and must transform identically afterwards; callers
/// never refit at predict time. Naming is an optional capability: a `None`
/// from [`Featurizer::feature_names`] means the featurizer declines to name
/// its outputs, and downstream name lookups fail explicitly.
pub trait Featurizer: Send + Sync {
    /// Learn any data-dependent state.
    fn fit(&mut self, x: &RowMajorMatrix) -> Result<(), OrthofitError>;
    /// Apply the fitted map.
    fn transform(&self, x: &RowMajorMatrix) -> Result<RowMajorMatrix, OrthofitError>;
    /// Names of the output features given input column names.
    fn feature_names(&self, input_names: &[String]) -> Option<Vec<String>>;
}

/// Builder for fresh featurizer instances, invoked once per consumer so no
/// fitted state is shared.
pub type FeaturizerFactory = Box<dyn Fn() -> Box<dyn Featurizer> + Send + Sync>;

/// All monomials of the input columns up to a total degree.
pub struct PolynomialFeatures {
    degree: usize,
    include_bias: bool,
    /// Each output feature as a sorted multiset of input column indices;
    /// empty means the bias column.
    powers: Option<Vec<Vec<usize>>>,
    n_inputs: usize,
}

impl PolynomialFeatures {
    /// Create a new PolynomialFeatures map.
    ///
    /// * `degree` - Highest total degree of the generated monomials.
    /// * `include_bias` - Whether to emit a leading constant column.
    pub fn new(degree: usize, include_bias: bool) -> Result<Self, OrthofitError> {
        if degree < 1 {
            return Err(OrthofitError::InvalidParameter(
                "degree".to_string(),
                "an integer of at least 1".to_string(),
                degree.to_string(),
            ));
        }
        Ok(PolynomialFeatures {
            degree,
            include_bias,
            powers: None,
            n_inputs: 0,
        })
    }

    fn combos(d: usize, deg: usize, start: usize, current: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
        if deg == 0 {
            out.push(current.clone());
            return;
        }
        for j in start..d {
            current.push(j);
            Self::combos(d, deg - 1, j, current, out);
            current.pop();
        }
    }
}

impl Featurizer for PolynomialFeatures {
    fn fit(&mut self, x: &RowMajorMatrix) -> Result<(), OrthofitError> {
        let mut powers: Vec<Vec<usize>> = Vec::new();
        if self.include_bias {
            powers.push(Vec::new());
        }
        for deg in 1..=self.degree {
            Self::combos(x.cols, deg, 0, &mut Vec::new(), &mut powers);
        }
        self.n_inputs = x.cols;
        self.powers = Some(powers);
        Ok(())
    }

    fn transform(&self, x: &RowMajorMatrix) -> Result<RowMajorMatrix, OrthofitError> {
        let powers = self
            .powers
            .as_ref()
            .ok_or_else(|| OrthofitError::NotFitted("transform".to_string()))?;
        if x.cols != self.n_inputs {
            return Err(OrthofitError::Configuration(format!(
                "featurizer was fit on {} columns but asked to transform {}",
                self.n_inputs, x.cols
            )));
        }
        let mut out = RowMajorMatrix::zeros(x.rows, powers.len());
        for i in 0..x.rows {
            let row = x.row(i);
            for (j, power) in powers.iter().enumerate() {
                out.set(i, j, power.iter().map(|&c| row[c]).product());
            }
        }
        Ok(out)
    }

    fn feature_names(&self, input_names: &[String]) -> Option<Vec<String>> {
        let powers = self.powers.as_ref()?;
        if input_names.len() != self.n_inputs {
            return None;
        }
        let names = powers
            .iter()
            .map(|power| {
                if power.is_empty() {
                    return "1".to_string();
                }
                let mut parts: Vec<String> = Vec::new();
                let mut idx = 0;
                while idx < power.len() {
                    let col = power[idx];
                    let count = power[idx..].iter().take_while(|&&c| c == col).count();
                    if count == 1 {
                        parts.push(input_names[col].clone());
                    } else {
                        parts.push(format!("{}^{}", input_names[col], count));
                    }
                    idx += count;
                }
                parts.join(" ")
            })
            .collect();
        Some(names)
    }
}

/// Random Fourier feature map approximating an RBF kernel.
///
/// Frequencies are drawn from N(0, 1/bandwidth) and phases from U(0, 2pi), so
/// the transform is sqrt(2/dim) * cos(X omega + b).
pub struct RandomFourierFeatures {
    dim: usize,
    bandwidth: f64,
    seed: u64,
    omegas: Option<RowMajorMatrix>,
    biases: Option<Vec<f64>>,
}

impl RandomFourierFeatures {
    /// Create a new RandomFourierFeatures map.
    ///
    /// * `dim` - Number of output features.
    /// * `bandwidth` - Kernel bandwidth; frequencies scale with its inverse.
    /// * `seed` - Seed for the frequency and phase draws.
    pub fn new(dim: usize, bandwidth: f64, seed: u64) -> Result<Self, OrthofitError> {
        if dim < 1 {
            return Err(OrthofitError::InvalidParameter(
                "dim".to_string(),
                "an integer of at least 1".to_string(),
                dim.to_string(),
            ));
        }
        if !(bandwidth.is_finite() && bandwidth > 0.0) {
            return Err(OrthofitError::InvalidParameter(
                "bandwidth".to_string(),
                "a positive number".to_string(),
                bandwidth.to_string(),
            ));
        }
        Ok(RandomFourierFeatures {
            dim,
            bandwidth,
            seed,
            omegas: None,
            biases: None,
        })
    }
}

impl Featurizer for RandomFourierFeatures {
    fn fit(&mut self, x: &RowMajorMatrix) -> Result<(), OrthofitError> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let normal = Normal::new(0.0, 1.0 / self.bandwidth)
            .map_err(|e| OrthofitError::Computation(format!("frequency distribution: {e}")))?;
        let mut omegas = RowMajorMatrix::zeros(x.cols, self.dim);
        for i in 0..x.cols {
            for j in 0..self.dim {
                omegas.set(i, j, normal.sample(&mut rng));
            }
        }
        let biases: Vec<f64> = (0..self.dim)
            .map(|_| rng.gen::<f64>() * 2.0 * std::f64::consts::PI)
            .collect();
        self.omegas = Some(omegas);
        self.biases = Some(biases);
        Ok(())
    }

    fn transform(&self, x: &RowMajorMatrix) -> Result<RowMajorMatrix, OrthofitError> {
        let omegas = self
            .omegas
            .as_ref()
            .ok_or_else(|| OrthofitError::NotFitted("transform".to_string()))?;
        let biases = self
            .biases
            .as_ref()
            .ok_or_else(|| OrthofitError::NotFitted("transform".to_string()))?;
        if x.cols != omegas.rows {
            return Err(OrthofitError::Configuration(format!(
                "featurizer was fit on {} columns but asked to transform {}",
                omegas.rows, x.cols
            )));
        }
        let scale = (2.0 / self.dim as f64).sqrt();
        let mut out = RowMajorMatrix::zeros(x.rows, self.dim);
        for i in 0..x.rows {
            let row = x.row(i);
            for j in 0..self.dim {
                let mut angle = biases[j];
                for (k, &v) in row.iter().enumerate() {
                    angle += v * omegas.get(k, j);
                }
                out.set(i, j, scale * angle.cos());
            }
        }
        Ok(out)
    }

    fn feature_names(&self, _input_names: &[String]) -> Option<Vec<String>> {
        None
    }
}
