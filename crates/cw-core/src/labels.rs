//! Label encoding helpers.
//!
//! Attacks consume targets as one-hot rows of shape `[batch, num_classes]`;
//! these helpers convert between class indices, scores and that encoding.

use crate::{CwError, Result};
use ndarray::{Array2, ArrayView1};

/// Index of the largest entry in a row. Ties resolve to the lowest index.
pub fn argmax(row: ArrayView1<'_, f32>) -> usize {
    let mut best = 0;
    let mut best_value = f32::NEG_INFINITY;
    for (idx, &value) in row.iter().enumerate() {
        if value > best_value {
            best = idx;
            best_value = value;
        }
    }
    best
}

/// Row-wise [`argmax`].
pub fn argmax_rows(scores: &Array2<f32>) -> Vec<usize> {
    scores.rows().into_iter().map(argmax).collect()
}

/// One-hot encode class indices.
pub fn one_hot(labels: &[usize], num_classes: usize) -> Result<Array2<f32>> {
    let mut encoded = Array2::zeros((labels.len(), num_classes));
    for (row, &label) in labels.iter().enumerate() {
        if label >= num_classes {
            return Err(CwError::InvalidConfig(format!(
                "label {label} out of range for {num_classes} classes"
            )));
        }
        encoded[[row, label]] = 1.0;
    }
    Ok(encoded)
}

/// One-hot encoding of the top-1 class of each row of `predictions`.
pub fn labels_from_predictions(predictions: &Array2<f32>) -> Array2<f32> {
    let mut encoded = Array2::zeros(predictions.raw_dim());
    for (row, label) in argmax_rows(predictions).into_iter().enumerate() {
        encoded[[row, label]] = 1.0;
    }
    encoded
}
