//! Per-sample adaptive line search with bounded halving and doubling.
//!
//! One call performs a single outer iteration for the active samples:
//!
//! 1. **Halving**: every sample whose latest trial did not beat the loss at the
//!    start of the iteration evaluates `u + lr · p`, then halves `lr`.
//! 2. Every active `lr` is doubled once.
//! 3. **Doubling**: samples that halved exactly once (the first trial already
//!    improved) keep doubling `lr` while the trial loss stays at or below the
//!    best loss seen.
//! 4. Samples that halved exactly once halve `lr` again.
//! 5. Samples with a positive best step commit it.
//!
//! Trials write into scratch buffers; the committed state in [`BatchState`]
//! only changes in step 5, so a sample that found no improving step keeps its
//! previous candidate and loss.

use crate::loss::Objective;
use crate::state::BatchState;
use crate::transform::from_tanh;
use cw_core::{Classifier, CwError, Result};
use ndarray::{ArrayD, Axis};
use tracing::trace;

/// Halving/doubling bounds of the search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSearch {
    pub max_halving: usize,
    pub max_doubling: usize,
}

/// Summary of one line search call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineSearchOutcome {
    /// Halving rounds that evaluated at least one sample.
    pub halving_rounds: usize,
    /// Doubling rounds that evaluated at least one sample.
    pub doubling_rounds: usize,
    /// Samples whose candidate was replaced.
    pub updated: usize,
}

impl LineSearch {
    pub fn new(max_halving: usize, max_doubling: usize) -> Self {
        Self {
            max_halving,
            max_doubling,
        }
    }

    /// Search along `direction` (row `k` belongs to sample `active[k]`) and
    /// commit improving steps into `state`.
    pub fn step<C: Classifier + ?Sized>(
        &self,
        classifier: &C,
        objective: &Objective<'_>,
        state: &mut BatchState,
        active: &[usize],
        direction: &ArrayD<f32>,
    ) -> Result<LineSearchOutcome> {
        let mut outcome = LineSearchOutcome::default();
        let m = active.len();
        if m == 0 {
            return Ok(outcome);
        }
        let mut expected = vec![m];
        expected.extend_from_slice(&state.x.shape()[1..]);
        if direction.shape() != expected.as_slice() {
            return Err(CwError::shape_mismatch(&expected, direction.shape()));
        }

        let prev_loss: Vec<f32> = active.iter().map(|&i| state.loss[i]).collect();
        let mut trial_loss = prev_loss.clone();
        let mut best_loss = prev_loss.clone();
        let mut best_lr = vec![0.0_f32; m];
        let mut halving = vec![0_usize; m];

        for round in 0..self.max_halving {
            let rows: Vec<usize> = (0..m).filter(|&k| trial_loss[k] >= prev_loss[k]).collect();
            trace!(
                "Halving round {} of {}: {} samples",
                round + 1,
                self.max_halving,
                rows.len()
            );
            if rows.is_empty() {
                break;
            }
            let losses = self.trial(classifier, objective, state, active, &rows, direction)?;
            for (&k, &loss) in rows.iter().zip(losses.iter()) {
                let i = active[k];
                trial_loss[k] = loss;
                if loss < best_loss[k] {
                    best_loss[k] = loss;
                    best_lr[k] = state.lr[i];
                }
                state.lr[i] /= 2.0;
                halving[k] += 1;
            }
            outcome.halving_rounds += 1;
        }

        for &i in active {
            state.lr[i] *= 2.0;
        }

        for round in 0..self.max_doubling {
            let rows: Vec<usize> = (0..m)
                .filter(|&k| halving[k] == 1 && trial_loss[k] <= best_loss[k])
                .collect();
            trace!(
                "Doubling round {} of {}: {} samples",
                round + 1,
                self.max_doubling,
                rows.len()
            );
            if rows.is_empty() {
                break;
            }
            for &k in &rows {
                state.lr[active[k]] *= 2.0;
            }
            let losses = self.trial(classifier, objective, state, active, &rows, direction)?;
            for (&k, &loss) in rows.iter().zip(losses.iter()) {
                trial_loss[k] = loss;
                if loss < best_loss[k] {
                    best_loss[k] = loss;
                    best_lr[k] = state.lr[active[k]];
                }
            }
            outcome.doubling_rounds += 1;
        }

        for (k, &i) in active.iter().enumerate() {
            if halving[k] == 1 {
                state.lr[i] /= 2.0;
            }
        }

        let rows: Vec<usize> = (0..m).filter(|&k| best_lr[k] > 0.0).collect();
        trace!("Committing {} of {} samples", rows.len(), m);
        if !rows.is_empty() {
            let idx: Vec<usize> = rows.iter().map(|&k| active[k]).collect();
            let steps: Vec<f32> = rows.iter().map(|&k| best_lr[k]).collect();
            let (u, x_adv) = candidates(state, &idx, &rows, &steps, direction);
            let eval = objective.evaluate(classifier, state, &idx, &x_adv)?;
            state.commit(&idx, &u, &x_adv, eval);
        }
        outcome.updated = rows.len();
        Ok(outcome)
    }

    /// Evaluate the current step size of the given rows without committing.
    fn trial<C: Classifier + ?Sized>(
        &self,
        classifier: &C,
        objective: &Objective<'_>,
        state: &BatchState,
        active: &[usize],
        rows: &[usize],
        direction: &ArrayD<f32>,
    ) -> Result<Vec<f32>> {
        let idx: Vec<usize> = rows.iter().map(|&k| active[k]).collect();
        let steps: Vec<f32> = idx.iter().map(|&i| state.lr[i]).collect();
        let (_, x_adv) = candidates(state, &idx, rows, &steps, direction);
        let eval = objective.evaluate(classifier, state, &idx, &x_adv)?;
        Ok(eval.loss.to_vec())
    }
}

/// Candidate points `u[idx] + step · direction[rows]` in tanh and original space.
fn candidates(
    state: &BatchState,
    idx: &[usize],
    rows: &[usize],
    steps: &[f32],
    direction: &ArrayD<f32>,
) -> (ArrayD<f32>, ArrayD<f32>) {
    let mut u = state.x_adv_tanh.select(Axis(0), idx);
    let dir = direction.select(Axis(0), rows);
    for ((mut row, d), &step) in u
        .axis_iter_mut(Axis(0))
        .zip(dir.axis_iter(Axis(0)))
        .zip(steps)
    {
        row.scaled_add(step, &d);
    }
    let x_adv = from_tanh(
        &u,
        &state.lower.select(Axis(0), idx),
        &state.upper.select(Axis(0), idx),
    );
    (u, x_adv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loss::MarginLoss;
    use cw_core::{ClipValues, LinearClassifier};
    use ndarray::{arr1, arr2, Array1};

    /// Two classes, logit gap linear in the single feature.
    fn setup(x: &[f32]) -> (LinearClassifier, BatchState) {
        let clf = LinearClassifier::new(
            arr2(&[[1.0], [-1.0]]),
            arr1(&[0.0, 0.0]),
            vec![1],
            ClipValues::scalar(-1.0, 1.0).unwrap(),
        )
        .unwrap();
        let xs = Array1::from(x.to_vec())
            .into_shape_with_order((x.len(), 1))
            .unwrap()
            .into_dyn();
        let (lower, upper) = clf.clip_values().broadcast_to(xs.shape()).unwrap();
        let mut targets = ndarray::Array2::zeros((x.len(), 2));
        targets.column_mut(1).fill(1.0);
        let state = BatchState::new(&xs, lower, upper, targets, 0.01).unwrap();
        (clf, state)
    }

    #[test]
    fn test_improving_step_is_committed_and_doubled() {
        let (clf, mut state) = setup(&[0.5]);
        let objective = Objective::margin_only(MarginLoss::new(0.0, true));
        state.evaluate_all(&clf, &objective).unwrap();
        let before = state.loss[0];
        assert!(before > 0.0);

        let direction = -objective.gradient(&clf, &state, &[0]).unwrap();
        let search = LineSearch::new(5, 3);
        let outcome = search
            .step(&clf, &objective, &mut state, &[0], &direction)
            .unwrap();

        assert_eq!(outcome.halving_rounds, 1);
        assert_eq!(outcome.doubling_rounds, 3);
        assert_eq!(outcome.updated, 1);
        assert!(state.loss[0] < before);
        // 0.01 doubled three times, then halved back once
        assert!((state.lr[0] - 0.04).abs() < 1e-7);
    }

    #[test]
    fn test_no_commit_without_improvement() {
        let (clf, mut state) = setup(&[0.5]);
        let objective = Objective::margin_only(MarginLoss::new(0.0, true));
        state.evaluate_all(&clf, &objective).unwrap();
        let before_loss = state.loss[0];
        let before_x = state.x_adv.clone();

        // Ascent direction: every trial is worse.
        let direction = objective.gradient(&clf, &state, &[0]).unwrap();
        let outcome = LineSearch::new(4, 4)
            .step(&clf, &objective, &mut state, &[0], &direction)
            .unwrap();

        assert_eq!(outcome.halving_rounds, 4);
        assert_eq!(outcome.doubling_rounds, 0);
        assert_eq!(outcome.updated, 0);
        assert_eq!(state.loss[0], before_loss);
        assert_eq!(state.x_adv, before_x);
        // Four halvings undone by one doubling
        assert!((state.lr[0] - 0.01 / 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_inactive_samples_are_untouched() {
        let (clf, mut state) = setup(&[0.5, 0.2]);
        let objective = Objective::margin_only(MarginLoss::new(0.0, true));
        state.evaluate_all(&clf, &objective).unwrap();
        let untouched = state.x_adv.index_axis(Axis(0), 0).to_owned();

        let direction = -objective.gradient(&clf, &state, &[1]).unwrap();
        LineSearch::new(5, 5)
            .step(&clf, &objective, &mut state, &[1], &direction)
            .unwrap();

        assert_eq!(state.x_adv.index_axis(Axis(0), 0), untouched);
        assert_eq!(state.lr[0], 0.01);
        assert!(state.lr[1] > 0.01);
    }

    #[test]
    fn test_committed_candidate_matches_tanh_coordinates() {
        let (clf, mut state) = setup(&[0.3, 0.4]);
        let objective = Objective::margin_only(MarginLoss::new(0.0, true));
        state.evaluate_all(&clf, &objective).unwrap();
        for _ in 0..5 {
            let direction = -objective.gradient(&clf, &state, &[0, 1]).unwrap();
            LineSearch::new(5, 5)
                .step(&clf, &objective, &mut state, &[0, 1], &direction)
                .unwrap();
            let decoded = from_tanh(&state.x_adv_tanh, &state.lower, &state.upper);
            assert_eq!(decoded, state.x_adv);
        }
    }

    #[test]
    fn test_rejects_direction_shape() {
        let (clf, mut state) = setup(&[0.5]);
        let objective = Objective::margin_only(MarginLoss::new(0.0, true));
        let direction = ArrayD::zeros(ndarray::IxDyn(&[2, 1]));
        let err = LineSearch::new(1, 1)
            .step(&clf, &objective, &mut state, &[0], &direction)
            .unwrap_err();
        assert!(matches!(err, CwError::ShapeMismatch { .. }));
    }
}
