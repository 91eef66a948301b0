//! Errors
//!
//! Custom error types used throughout the `orthofit` crate.
use thiserror::Error;

/// Errors that can occur while building or querying an orthogonal learner.
#[derive(Debug, Error)]
pub enum OrthofitError {
    /// First value is the name of the parameter, second is expected, third is what was passed.
    #[error("Invalid parameter value passed for {0}, expected {1} but {2} provided.")]
    InvalidParameter(String, String, String),
    /// An input array does not match the row count of the rest of the bundle.
    #[error("Array {0} has {1} rows, but {2} were expected.")]
    RowCountMismatch(String, usize, usize),
    /// The fold structure handed to the cross-fit executor is unusable.
    #[error("Invalid fold structure: {0}")]
    InvalidFolds(String),
    /// A training split does not cover every observed treatment category.
    #[error("The training split of fold {0} does not contain treatment category {1}; every training split must include all observed categories.")]
    MissingTreatmentCategory(usize, usize),
    /// A combination of settings that cannot be estimated.
    #[error("Invalid configuration: {0}")]
    Configuration(String),
    /// A query method was called before `fit`.
    #[error("The model must be fit before calling {0}.")]
    NotFitted(String),
    /// An optional capability was requested from a model that does not provide it.
    #[error("Missing capability: {0}")]
    MissingCapability(String),
    /// A numerical routine failed to produce a finite result.
    #[error("Numerical computation failed: {0}")]
    Computation(String),
}
