//! Affine classifier with exact gradients.
//!
//! `logits = flatten(x) · Wᵀ + b`. Useful as a deterministic oracle for tests
//! and benchmarks, and as a surrogate when only a linear model is available.

use crate::{Classifier, ClipValues, CwError, Result};
use ndarray::{Array1, Array2, ArrayD, Axis, IxDyn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Linear classifier over inputs of a fixed sample shape.
#[derive(Debug, Clone)]
pub struct LinearClassifier {
    /// Weights of shape `[num_classes, num_features]`.
    weights: Array2<f32>,
    /// Bias of shape `[num_classes]`.
    bias: Array1<f32>,
    /// Shape of a single sample; its product equals `num_features`.
    input_shape: Vec<usize>,
    clip_values: ClipValues,
}

impl LinearClassifier {
    /// Create a classifier. `input_shape` excludes the batch axis.
    pub fn new(
        weights: Array2<f32>,
        bias: Array1<f32>,
        input_shape: Vec<usize>,
        clip_values: ClipValues,
    ) -> Result<Self> {
        let num_features: usize = input_shape.iter().product();
        if weights.ncols() != num_features {
            return Err(CwError::shape_mismatch(
                &[weights.nrows(), num_features],
                weights.shape(),
            ));
        }
        if bias.len() != weights.nrows() {
            return Err(CwError::shape_mismatch(&[weights.nrows()], bias.shape()));
        }
        Ok(Self {
            weights,
            bias,
            input_shape,
            clip_values,
        })
    }

    /// Classifier with weights and bias drawn uniformly from `[-1, 1]`.
    pub fn random(
        input_shape: Vec<usize>,
        num_classes: usize,
        clip_values: ClipValues,
        seed: u64,
    ) -> Result<Self> {
        let mut rng = StdRng::seed_from_u64(seed);
        let num_features: usize = input_shape.iter().product();
        let weights = Array2::from_shape_fn((num_classes, num_features), |_| {
            rng.random_range(-1.0_f32..=1.0)
        });
        let bias = Array1::from_shape_fn(num_classes, |_| rng.random_range(-1.0_f32..=1.0));
        Self::new(weights, bias, input_shape, clip_values)
    }

    pub fn weights(&self) -> &Array2<f32> {
        &self.weights
    }

    fn num_features(&self) -> usize {
        self.weights.ncols()
    }

    /// Flatten a batch to `[batch, num_features]`, checking the sample shape.
    fn flatten(&self, x: &ArrayD<f32>) -> Result<Array2<f32>> {
        if x.ndim() == 0 || x.shape()[1..] != self.input_shape[..] {
            let mut expected = vec![x.shape().first().copied().unwrap_or(0)];
            expected.extend_from_slice(&self.input_shape);
            return Err(CwError::shape_mismatch(&expected, x.shape()));
        }
        let batch = x.shape()[0];
        Ok(x.to_shape((batch, self.num_features()))?.to_owned())
    }

    fn logits(&self, flat: &Array2<f32>) -> Array2<f32> {
        flat.dot(&self.weights.t()) + &self.bias
    }
}

/// Numerically stable row-wise softmax.
fn softmax_rows(logits: &Array2<f32>) -> Array2<f32> {
    let mut probs = logits.clone();
    for mut row in probs.rows_mut() {
        let max = row.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row /= sum;
    }
    probs
}

impl Classifier for LinearClassifier {
    fn num_classes(&self) -> usize {
        self.weights.nrows()
    }

    fn predict(&self, x: &ArrayD<f32>, logits: bool) -> Result<Array2<f32>> {
        let flat = self.flatten(x)?;
        let z = self.logits(&flat);
        Ok(if logits { z } else { softmax_rows(&z) })
    }

    fn class_gradient(
        &self,
        x: &ArrayD<f32>,
        labels: &[usize],
        logits: bool,
    ) -> Result<ArrayD<f32>> {
        let flat = self.flatten(x)?;
        let batch = flat.nrows();
        if labels.len() != batch {
            return Err(CwError::shape_mismatch(&[batch], &[labels.len()]));
        }
        let num_classes = self.num_classes();
        if let Some(&bad) = labels.iter().find(|&&l| l >= num_classes) {
            return Err(CwError::Classifier(format!(
                "class index {bad} out of range for {num_classes} classes"
            )));
        }

        let mut grad = Array2::zeros((batch, self.num_features()));
        if logits {
            for (mut row, &label) in grad.rows_mut().into_iter().zip(labels) {
                row.assign(&self.weights.row(label));
            }
        } else {
            // d p_k / dx = p_k * (W_k - Σ_j p_j W_j)
            let probs = softmax_rows(&self.logits(&flat));
            let expected_w = probs.dot(&self.weights);
            for (i, &label) in labels.iter().enumerate() {
                let p = probs[[i, label]];
                let row = (&self.weights.row(label) - &expected_w.row(i)) * p;
                grad.index_axis_mut(Axis(0), i).assign(&row);
            }
        }

        let mut shape = vec![batch];
        shape.extend_from_slice(&self.input_shape);
        Ok(grad.into_shape_with_order(IxDyn(&shape))?)
    }

    fn clip_values(&self) -> &ClipValues {
        &self.clip_values
    }
}
