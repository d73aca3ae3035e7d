//! Attack-level tests shared across modules.

mod scenarios;

use cw_core::{Classifier, ClipValues, LinearClassifier, Result};
use ndarray::{Array2, ArrayD};
use std::cell::RefCell;

/// Install a test-friendly subscriber once; later calls are no-ops.
pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Oracle call made through [`Recording`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Call {
    Predict(usize),
    Gradient(usize),
}

/// Classifier wrapper that records the batch size of every oracle call.
pub(crate) struct Recording<C> {
    pub inner: C,
    pub calls: RefCell<Vec<Call>>,
}

impl<C> Recording<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.borrow().clone()
    }
}

impl<C: Classifier> Classifier for Recording<C> {
    fn num_classes(&self) -> usize {
        self.inner.num_classes()
    }

    fn predict(&self, x: &ArrayD<f32>, logits: bool) -> Result<Array2<f32>> {
        self.calls.borrow_mut().push(Call::Predict(x.shape()[0]));
        self.inner.predict(x, logits)
    }

    fn class_gradient(
        &self,
        x: &ArrayD<f32>,
        labels: &[usize],
        logits: bool,
    ) -> Result<ArrayD<f32>> {
        self.calls.borrow_mut().push(Call::Gradient(x.shape()[0]));
        self.inner.class_gradient(x, labels, logits)
    }

    fn clip_values(&self) -> &ClipValues {
        self.inner.clip_values()
    }
}

/// Two features, two classes; class 1 wins when `x0 < x1`.
pub(crate) fn two_class_linear() -> LinearClassifier {
    LinearClassifier::new(
        ndarray::arr2(&[[1.0, -1.0], [-1.0, 1.0]]),
        ndarray::arr1(&[0.0, 0.0]),
        vec![2],
        ClipValues::scalar(0.0, 1.0).unwrap(),
    )
    .unwrap()
}
