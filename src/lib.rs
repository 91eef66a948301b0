
// Modules
pub mod crossfit;
pub mod data;
pub mod dml;
pub mod encode;
pub mod errors;
pub mod featurize;
pub mod final_stage;
pub mod first_stage;
pub mod folds;
pub mod models;
pub mod ortho;
pub mod rlearner;
pub mod utils;

// Individual classes, and functions
pub use data::{CausalData, EffectTensor, RowMajorMatrix, Target, TreatmentSpec};
pub use dml::{Dml, DmlOptions, FinalSpec, NuisanceSpec};
pub use errors::OrthofitError;
pub use folds::{Fold, FoldSpec};
pub use ortho::OrthoLearner;
pub use rlearner::{RLearner, TreatmentModel};
