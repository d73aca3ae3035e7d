//! Margin loss on logits and the objectives built from it.
//!
//! With `z` the logits and `t` the one-hot target:
//! - `z_target = Σ z·t`
//! - `z_other  = max(z·(1 - t) + (min(z) - 1)·t)` (largest non-target logit)
//! - targeted:   `max(0, z_other - z_target + confidence)`
//! - untargeted: `max(0, z_target - z_other + confidence)`
//!
//! The margin is zero exactly when the target ordering holds with at least
//! `confidence` to spare. Note this is not the paper's `max(·, -confidence)`
//! form: there the term would be negative on success, here it is clamped at
//! zero so that zero loss and success coincide.

use crate::state::BatchState;
use crate::transform::tanh_jacobian;
use cw_core::labels::{argmax, argmax_rows};
use cw_core::{Classifier, CwError, Result};
use ndarray::{Array1, Array2, ArrayD, Axis, Zip};

/// Hinge-style classification margin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarginLoss {
    pub confidence: f32,
    pub targeted: bool,
}

impl MarginLoss {
    pub fn new(confidence: f32, targeted: bool) -> Self {
        Self {
            confidence,
            targeted,
        }
    }

    /// Logits with the target entry pushed below every other entry.
    pub fn masked_logits(logits: &Array2<f32>, targets: &Array2<f32>) -> Array2<f32> {
        let mut masked = Array2::zeros(logits.raw_dim());
        for ((mut out, z), t) in masked
            .rows_mut()
            .into_iter()
            .zip(logits.rows())
            .zip(targets.rows())
        {
            let floor = z.fold(f32::INFINITY, |m, &v| m.min(v)) - 1.0;
            Zip::from(&mut out)
                .and(&z)
                .and(&t)
                .for_each(|o, &z, &t| *o = z * (1.0 - t) + floor * t);
        }
        masked
    }

    /// Per-sample margin, `>= 0`, or NaN when any logit of the sample is NaN.
    pub fn margin(&self, logits: &Array2<f32>, targets: &Array2<f32>) -> Array1<f32> {
        let z_target = (logits * targets).sum_axis(Axis(1));
        let z_other = Self::masked_logits(logits, targets)
            .map_axis(Axis(1), |row| row.fold(f32::NEG_INFINITY, |m, &v| m.max(v)));
        let mut margin = Zip::from(&z_target)
            .and(&z_other)
            .map_collect(|&target, &other| {
                let gap = if self.targeted {
                    other - target
                } else {
                    target - other
                };
                // f32::max drops NaN, which would read as success.
                if gap.is_nan() {
                    f32::NAN
                } else {
                    (gap + self.confidence).max(0.0)
                }
            });
        for (m, z) in margin.iter_mut().zip(logits.rows()) {
            if z.iter().any(|v| v.is_nan()) {
                *m = f32::NAN;
            }
        }
        margin
    }

    /// Class indices `(add, sub)` whose logit gradients form the margin gradient:
    /// raising logit `add` increases the margin, raising logit `sub` decreases it.
    pub fn gradient_classes(
        &self,
        logits: &Array2<f32>,
        targets: &Array2<f32>,
    ) -> (Vec<usize>, Vec<usize>) {
        let target: Vec<usize> = targets.rows().into_iter().map(argmax).collect();
        let other = argmax_rows(&Self::masked_logits(logits, targets));
        if self.targeted {
            (other, target)
        } else {
            (target, other)
        }
    }
}

/// Sum of squared differences over all non-batch axes.
pub fn squared_l2_distance(x: &ArrayD<f32>, x_adv: &ArrayD<f32>) -> Array1<f32> {
    let n = x.shape()[0];
    let mut dist = Array1::zeros(n);
    for (i, (a, b)) in x
        .axis_iter(Axis(0))
        .zip(x_adv.axis_iter(Axis(0)))
        .enumerate()
    {
        dist[i] = Zip::from(&a)
            .and(&b)
            .fold(0.0_f32, |acc, &a, &b| acc + (a - b) * (a - b));
    }
    dist
}

/// Objective values at a set of candidates.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub logits: Array2<f32>,
    pub margin: Array1<f32>,
    pub l2dist: Array1<f32>,
    pub loss: Array1<f32>,
}

/// Objective minimized by the line search.
///
/// Without a trade-off constant the loss is the margin alone (L∞ attack);
/// with per-sample constants `c` it is `c · margin + l2dist` (L2 attack).
#[derive(Debug, Clone, Copy)]
pub struct Objective<'a> {
    margin: MarginLoss,
    trade_off: Option<&'a Array1<f32>>,
}

impl<'a> Objective<'a> {
    pub fn margin_only(margin: MarginLoss) -> Self {
        Self {
            margin,
            trade_off: None,
        }
    }

    /// `c` is indexed by sample over the whole batch.
    pub fn with_distance(margin: MarginLoss, c: &'a Array1<f32>) -> Self {
        Self {
            margin,
            trade_off: Some(c),
        }
    }

    /// Evaluate candidates `x_adv` for the samples `idx` (row `k` belongs to sample `idx[k]`).
    pub fn evaluate<C: Classifier + ?Sized>(
        &self,
        classifier: &C,
        state: &BatchState,
        idx: &[usize],
        x_adv: &ArrayD<f32>,
    ) -> Result<Evaluation> {
        let targets = state.targets.select(Axis(0), idx);
        let logits = classifier.predict(x_adv, true)?;
        if logits.shape() != targets.shape() {
            return Err(CwError::shape_mismatch(targets.shape(), logits.shape()));
        }

        let margin = self.margin.margin(&logits, &targets);
        let l2dist = squared_l2_distance(&state.x.select(Axis(0), idx), x_adv);
        let loss = match self.trade_off {
            Some(c) => c.select(Axis(0), idx) * &margin + &l2dist,
            None => margin.clone(),
        };

        Ok(Evaluation {
            logits,
            margin,
            l2dist,
            loss,
        })
    }

    /// Gradient of the objective with respect to the tanh-space coordinates
    /// of the committed candidates of samples `idx`.
    pub fn gradient<C: Classifier + ?Sized>(
        &self,
        classifier: &C,
        state: &BatchState,
        idx: &[usize],
    ) -> Result<ArrayD<f32>> {
        let logits = state.logits.select(Axis(0), idx);
        let targets = state.targets.select(Axis(0), idx);
        let (add, sub) = self.margin.gradient_classes(&logits, &targets);

        let x_adv = state.x_adv.select(Axis(0), idx);
        let mut grad = classifier.class_gradient(&x_adv, &add, true)?;
        let grad_sub = classifier.class_gradient(&x_adv, &sub, true)?;
        if grad.shape() != x_adv.shape() {
            return Err(CwError::shape_mismatch(x_adv.shape(), grad.shape()));
        }
        if grad_sub.shape() != x_adv.shape() {
            return Err(CwError::shape_mismatch(x_adv.shape(), grad_sub.shape()));
        }
        grad -= &grad_sub;

        if let Some(c) = self.trade_off {
            for (mut row, &i) in grad.axis_iter_mut(Axis(0)).zip(idx) {
                row *= c[i];
            }
            let x = state.x.select(Axis(0), idx);
            Zip::from(&mut grad)
                .and(&x_adv)
                .and(&x)
                .for_each(|g, &adv, &orig| *g += 2.0 * (adv - orig));
        }

        let jacobian = tanh_jacobian(
            &state.x_adv_tanh.select(Axis(0), idx),
            &state.lower.select(Axis(0), idx),
            &state.upper.select(Axis(0), idx),
        );
        grad *= &jacobian;
        Ok(grad)
    }
}
