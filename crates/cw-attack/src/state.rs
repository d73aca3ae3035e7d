//! Per-batch optimization state.
//!
//! Every per-sample quantity lives in its own array indexed by sample
//! (struct-of-arrays); stages select the rows they work on by index and write
//! results back by index. State is created per batch and dropped once the
//! batch's adversarial examples have been written out.

use crate::loss::{Evaluation, Objective};
use crate::transform::to_tanh;
use cw_core::{Classifier, CwError, Result};
use ndarray::{Array1, Array2, ArrayD, Axis, Zip};

/// Mutable state of one batch under attack.
#[derive(Debug, Clone)]
pub struct BatchState {
    /// Original samples clipped into their box.
    pub x: ArrayD<f32>,
    /// `x` in tanh space.
    pub x_tanh: ArrayD<f32>,
    /// Per-element lower bound of the feasible box.
    pub lower: ArrayD<f32>,
    /// Per-element upper bound of the feasible box.
    pub upper: ArrayD<f32>,
    /// One-hot targets, `[batch, num_classes]`.
    pub targets: Array2<f32>,
    /// Committed candidates.
    pub x_adv: ArrayD<f32>,
    /// Committed candidates in tanh space.
    pub x_adv_tanh: ArrayD<f32>,
    /// Logits at the committed candidates.
    pub logits: Array2<f32>,
    /// Margin term at the committed candidates (zero on success).
    pub margin: Array1<f32>,
    /// Squared L2 distance between `x` and `x_adv`.
    pub l2dist: Array1<f32>,
    /// Objective value at the committed candidates.
    pub loss: Array1<f32>,
    /// Line search step size.
    pub lr: Array1<f32>,
    /// Whether the committed candidate satisfies the attack goal.
    pub success: Vec<bool>,
}

impl BatchState {
    /// Build state for a batch. `lower`/`upper` must have the shape of `x`.
    pub fn new(
        x: &ArrayD<f32>,
        lower: ArrayD<f32>,
        upper: ArrayD<f32>,
        targets: Array2<f32>,
        learning_rate: f32,
    ) -> Result<Self> {
        if lower.shape() != x.shape() {
            return Err(CwError::shape_mismatch(x.shape(), lower.shape()));
        }
        if upper.shape() != x.shape() {
            return Err(CwError::shape_mismatch(x.shape(), upper.shape()));
        }
        let n = x.shape()[0];
        if targets.nrows() != n {
            return Err(CwError::shape_mismatch(
                &[n, targets.ncols()],
                targets.shape(),
            ));
        }
        if !Zip::from(&lower).and(&upper).all(|&l, &u| l <= u) {
            return Err(CwError::InvalidConfig(
                "clip values must satisfy lower <= upper".to_string(),
            ));
        }

        let x = Zip::from(x)
            .and(&lower)
            .and(&upper)
            .map_collect(|&v, &l, &u| v.clamp(l, u));
        let x_tanh = to_tanh(&x, &lower, &upper);
        let num_classes = targets.ncols();

        Ok(Self {
            x_adv: x.clone(),
            x_adv_tanh: x_tanh.clone(),
            x,
            x_tanh,
            lower,
            upper,
            targets,
            logits: Array2::zeros((n, num_classes)),
            margin: Array1::zeros(n),
            l2dist: Array1::zeros(n),
            loss: Array1::zeros(n),
            lr: Array1::from_elem(n, learning_rate),
            success: vec![false; n],
        })
    }

    /// Number of samples in the batch.
    pub fn len(&self) -> usize {
        self.success.len()
    }

    pub fn is_empty(&self) -> bool {
        self.success.is_empty()
    }

    /// Restart the search from the unperturbed samples.
    pub fn reset(&mut self, learning_rate: f32) {
        self.x_adv.assign(&self.x);
        self.x_adv_tanh.assign(&self.x_tanh);
        self.lr.fill(learning_rate);
    }

    /// Evaluate the committed candidates of every sample.
    pub fn evaluate_all<C: Classifier + ?Sized>(
        &mut self,
        classifier: &C,
        objective: &Objective<'_>,
    ) -> Result<()> {
        let idx: Vec<usize> = (0..self.len()).collect();
        let eval = objective.evaluate(classifier, self, &idx, &self.x_adv)?;
        self.apply(&idx, eval);
        Ok(())
    }

    /// Commit new candidates for the samples at `idx`.
    pub fn commit(
        &mut self,
        idx: &[usize],
        x_adv_tanh: &ArrayD<f32>,
        x_adv: &ArrayD<f32>,
        eval: Evaluation,
    ) {
        assign_rows(&mut self.x_adv_tanh, idx, x_adv_tanh);
        assign_rows(&mut self.x_adv, idx, x_adv);
        self.apply(idx, eval);
    }

    fn apply(&mut self, idx: &[usize], eval: Evaluation) {
        for (k, &i) in idx.iter().enumerate() {
            self.logits.row_mut(i).assign(&eval.logits.row(k));
            self.margin[i] = eval.margin[k];
            self.l2dist[i] = eval.l2dist[k];
            self.loss[i] = eval.loss[k];
            self.success[i] = eval.margin[k] <= 0.0;
        }
    }

    pub fn num_success(&self) -> usize {
        self.success.iter().filter(|&&s| s).count()
    }
}

/// Copy row `k` of `rows` into row `idx[k]` of `target`.
pub(crate) fn assign_rows(target: &mut ArrayD<f32>, idx: &[usize], rows: &ArrayD<f32>) {
    for (k, &i) in idx.iter().enumerate() {
        target
            .index_axis_mut(Axis(0), i)
            .assign(&rows.index_axis(Axis(0), k));
    }
}

/// Mean of a per-sample array, zero when empty.
pub(crate) fn mean(values: &Array1<f32>) -> f32 {
    values.mean().unwrap_or(0.0)
}

/// Smallest-distortion successful candidate seen per sample.
#[derive(Debug, Clone)]
pub struct BestAdversarial {
    l2dist: Array1<f32>,
    x_adv: Vec<Option<ArrayD<f32>>>,
}

impl BestAdversarial {
    pub fn new(n: usize) -> Self {
        Self {
            l2dist: Array1::from_elem(n, f32::INFINITY),
            x_adv: vec![None; n],
        }
    }

    /// Record every successful committed candidate that beats the stored
    /// distance. Returns the number of samples improved.
    pub fn record(&mut self, state: &BatchState) -> usize {
        let mut improved = 0;
        for i in 0..state.len() {
            if state.success[i] && state.l2dist[i] < self.l2dist[i] {
                self.l2dist[i] = state.l2dist[i];
                self.x_adv[i] = Some(state.x_adv.index_axis(Axis(0), i).to_owned());
                improved += 1;
            }
        }
        improved
    }

    /// Assemble the batch result; samples without a success take their row of `fallback`.
    pub fn into_adversarial(self, fallback: &ArrayD<f32>) -> ArrayD<f32> {
        let mut out = fallback.clone();
        for (i, best) in self.x_adv.into_iter().enumerate() {
            if let Some(row) = best {
                out.index_axis_mut(Axis(0), i).assign(&row);
            }
        }
        out
    }
}
