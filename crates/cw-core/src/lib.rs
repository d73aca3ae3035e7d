//! Core types and traits for Carlini–Wagner evasion attacks.
//!
//! This crate holds everything the attack engine needs from the outside world:
//! - [`Bound`] and [`ClipValues`]: the legal input range of a classifier
//! - [`Classifier`]: the oracle interface (logits and class gradients)
//! - [`labels`]: one-hot encoding helpers for target construction
//! - [`LinearClassifier`]: a deterministic affine oracle with exact gradients
//! - [`CwError`] / [`Result`]: the error taxonomy shared across the workspace

pub mod labels;
pub mod linear;

pub use linear::LinearClassifier;

use ndarray::{Array2, ArrayD, IxDyn, Zip};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A bound on a scalar value: [lower, upper].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bound {
    pub lower: f32,
    pub upper: f32,
}

/// Legal input values reported by a classifier.
///
/// Per-element bounds have the shape of a single sample (no batch axis) and
/// are broadcast across the batch when materialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClipValues {
    /// The same interval for every input element.
    Scalar(Bound),
    /// One interval per input element.
    PerElement {
        lower: ArrayD<f32>,
        upper: ArrayD<f32>,
    },
}

impl ClipValues {
    /// Scalar range `[lower, upper]` applied to every element.
    pub fn scalar(lower: f32, upper: f32) -> Result<Self> {
        if lower.is_nan() || upper.is_nan() || lower > upper {
            return Err(CwError::InvalidConfig(format!(
                "clip values must satisfy lower <= upper, got [{lower}, {upper}]"
            )));
        }
        Ok(ClipValues::Scalar(Bound { lower, upper }))
    }

    /// Per-element range. Both arrays must share a shape and satisfy `lower <= upper`.
    pub fn per_element(lower: ArrayD<f32>, upper: ArrayD<f32>) -> Result<Self> {
        if lower.shape() != upper.shape() {
            return Err(CwError::shape_mismatch(lower.shape(), upper.shape()));
        }
        if !Zip::from(&lower).and(&upper).all(|&l, &u| l <= u) {
            return Err(CwError::InvalidConfig(
                "per-element clip values must satisfy lower <= upper".to_string(),
            ));
        }
        Ok(ClipValues::PerElement { lower, upper })
    }

    /// Materialize lower and upper bounds with the given (batched) shape.
    pub fn broadcast_to(&self, shape: &[usize]) -> Result<(ArrayD<f32>, ArrayD<f32>)> {
        match self {
            ClipValues::Scalar(bound) => Ok((
                ArrayD::from_elem(IxDyn(shape), bound.lower),
                ArrayD::from_elem(IxDyn(shape), bound.upper),
            )),
            ClipValues::PerElement { lower, upper } => {
                let lower = lower
                    .broadcast(IxDyn(shape))
                    .ok_or_else(|| CwError::shape_mismatch(shape, lower.shape()))?
                    .to_owned();
                let upper = upper
                    .broadcast(IxDyn(shape))
                    .ok_or_else(|| CwError::shape_mismatch(shape, upper.shape()))?
                    .to_owned();
                Ok((lower, upper))
            }
        }
    }
}

/// Differentiable classifier oracle.
///
/// Inputs are batched along axis 0. Implementations are expected to be
/// stateless between calls; a stochastic oracle (e.g. an ensemble over random
/// transformations) is allowed, but callers must not assume two calls on the
/// same input agree.
pub trait Classifier {
    /// Number of output classes.
    fn num_classes(&self) -> usize;

    /// Class scores of shape `[batch, num_classes]`: raw logits when `logits`
    /// is true, softmax probabilities otherwise.
    fn predict(&self, x: &ArrayD<f32>, logits: bool) -> Result<Array2<f32>>;

    /// Gradient of the score of `labels[i]` with respect to sample `i`.
    ///
    /// `labels.len()` equals the batch size; the result has the shape of `x`.
    fn class_gradient(&self, x: &ArrayD<f32>, labels: &[usize], logits: bool)
        -> Result<ArrayD<f32>>;

    /// Legal input range.
    fn clip_values(&self) -> &ClipValues;
}

impl<C: Classifier + ?Sized> Classifier for &C {
    fn num_classes(&self) -> usize {
        (**self).num_classes()
    }

    fn predict(&self, x: &ArrayD<f32>, logits: bool) -> Result<Array2<f32>> {
        (**self).predict(x, logits)
    }

    fn class_gradient(
        &self,
        x: &ArrayD<f32>,
        labels: &[usize],
        logits: bool,
    ) -> Result<ArrayD<f32>> {
        (**self).class_gradient(x, labels, logits)
    }

    fn clip_values(&self) -> &ClipValues {
        (**self).clip_values()
    }
}

/// Error types for attack configuration and execution.
///
/// Numerical non-convergence is not represented here: attacks fall back to
/// their best-effort result instead of failing.
#[derive(Debug, Error)]
pub enum CwError {
    /// A hyperparameter is outside its legal range.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Targeted attack requested without target labels.
    #[error("Target labels must be provided for a targeted attack")]
    MissingTargets,

    /// Arrays disagree in shape.
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch { expected: Vec<usize>, got: Vec<usize> },

    /// Failure reported by a classifier implementation.
    #[error("Classifier error: {0}")]
    Classifier(String),

    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("Failed to parse configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl CwError {
    /// Create a ShapeMismatch error from two shapes.
    pub fn shape_mismatch(expected: &[usize], got: &[usize]) -> Self {
        CwError::ShapeMismatch {
            expected: expected.to_vec(),
            got: got.to_vec(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CwError>;
