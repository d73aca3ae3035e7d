//! Common interface of the evasion attacks.

use crate::driver;
use cw_core::{Classifier, Result};
use ndarray::{Array2, ArrayD};
use serde::Serialize;

/// Result of [`EvasionAttack::generate`].
#[derive(Debug, Clone, Serialize)]
pub struct AttackOutput {
    /// Adversarial examples, same shape as the input.
    pub adversarial: ArrayD<f32>,
    /// Fraction of samples for which the attack goal holds, in `[0, 1]`.
    pub success_rate: f32,
    /// Number of batches the input was split into.
    pub num_batches: usize,
}

/// An attack that perturbs inputs to change a classifier's decision.
pub trait EvasionAttack {
    /// Human readable attack name.
    fn name(&self) -> &'static str;

    /// Whether `y` names the class to reach (true) or the class to leave.
    fn targeted(&self) -> bool;

    /// Samples optimized together.
    fn batch_size(&self) -> usize;

    /// Attack a single batch. `targets` is one-hot with one row per sample.
    fn attack_batch<C: Classifier + ?Sized>(
        &self,
        classifier: &C,
        x: &ArrayD<f32>,
        targets: &Array2<f32>,
    ) -> Result<ArrayD<f32>>;

    /// Attack `x` batch by batch.
    ///
    /// `y` holds one-hot labels: the targets of a targeted attack (required)
    /// or the true classes of an untargeted one (defaults to the classifier's
    /// own predictions).
    fn generate<C: Classifier + ?Sized>(
        &self,
        classifier: &C,
        x: &ArrayD<f32>,
        y: Option<&Array2<f32>>,
    ) -> Result<AttackOutput>
    where
        Self: Sized,
    {
        driver::generate(self, classifier, x, y)
    }
}
