//! Carlini–Wagner L2 attack.
//!
//! Minimizes `c · margin + ‖x_adv - x‖²` in tanh space, with a per-sample
//! binary search over the trade-off constant `c`. Each binary search round
//! restarts from the original samples; the smallest successful perturbation
//! seen across all rounds is kept.

use crate::attack::EvasionAttack;
use crate::config::CarliniL2Config;
use crate::line_search::LineSearch;
use crate::loss::{MarginLoss, Objective};
use crate::state::{mean, BatchState, BestAdversarial};
use cw_core::{Classifier, Result};
use ndarray::{Array1, Array2, ArrayD};
use tracing::debug;

/// Samples whose constant reaches this value stop being optimized.
pub const C_UPPER_BOUND: f32 = 1e11;

/// Per-sample state of the binary search over the trade-off constant.
#[derive(Debug, Clone)]
pub struct TradeOff {
    /// Current constant.
    pub c: Array1<f32>,
    /// Largest constant known to fail.
    pub lower: Array1<f32>,
    /// Still doubling (no success seen yet).
    pub doubling: Vec<bool>,
}

impl TradeOff {
    pub fn new(n: usize, initial_const: f32) -> Self {
        Self {
            c: Array1::from_elem(n, initial_const),
            lower: Array1::zeros(n),
            doubling: vec![true; n],
        }
    }

    /// Samples whose constant is still below [`C_UPPER_BOUND`].
    pub fn num_searching(&self) -> usize {
        self.c.iter().filter(|&&c| c < C_UPPER_BOUND).count()
    }

    /// Move each constant after a round: towards `lower` on success, away
    /// from it on failure (doubling until the first success).
    pub fn update(&mut self, success: &[bool]) {
        for (i, &ok) in success.iter().enumerate() {
            let c = self.c[i];
            if ok {
                self.doubling[i] = false;
                self.c[i] = (self.lower[i] + c) / 2.0;
            } else {
                self.c[i] = if self.doubling[i] {
                    c * 2.0
                } else {
                    c + (c - self.lower[i]) / 2.0
                };
                self.lower[i] = c;
            }
        }
    }
}

/// Carlini–Wagner attack minimizing L2 distortion.
#[derive(Debug, Clone)]
pub struct CarliniL2 {
    config: CarliniL2Config,
}

impl CarliniL2 {
    pub fn new(config: CarliniL2Config) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &CarliniL2Config {
        &self.config
    }
}

impl EvasionAttack for CarliniL2 {
    fn name(&self) -> &'static str {
        "C&W L2"
    }

    fn targeted(&self) -> bool {
        self.config.targeted
    }

    fn batch_size(&self) -> usize {
        self.config.batch_size
    }

    fn attack_batch<C: Classifier + ?Sized>(
        &self,
        classifier: &C,
        x: &ArrayD<f32>,
        targets: &Array2<f32>,
    ) -> Result<ArrayD<f32>> {
        let cfg = &self.config;
        let n = x.shape()[0];
        let (lower, upper) = classifier.clip_values().broadcast_to(x.shape())?;
        let mut state = BatchState::new(x, lower, upper, targets.clone(), cfg.learning_rate)?;
        let mut trade_off = TradeOff::new(n, cfg.initial_const);
        let mut best = BestAdversarial::new(n);
        let margin = MarginLoss::new(cfg.confidence, cfg.targeted);
        let search = LineSearch::new(cfg.max_halving, cfg.max_doubling);

        for round in 0..cfg.binary_search_steps {
            let searching = trade_off.num_searching();
            debug!(
                "Binary search step {} of {} (mean c = {:.4e}, {} of {} below the upper bound)",
                round + 1,
                cfg.binary_search_steps,
                mean(&trade_off.c),
                searching,
                n
            );
            if searching == 0 {
                break;
            }

            state.reset(cfg.learning_rate);
            let objective = Objective::with_distance(margin, &trade_off.c);
            state.evaluate_all(classifier, &objective)?;
            let mut overall_success = state.success.clone();

            for iteration in 0..cfg.max_iter {
                let improved = best.record(&state);
                debug!(
                    "Iteration {} of {}: loss {:.6}, l2dist {:.6}, margin {:.6}, {} of {} succeeded, {} improved",
                    iteration + 1,
                    cfg.max_iter,
                    mean(&state.loss),
                    mean(&state.l2dist),
                    mean(&state.margin),
                    state.num_success(),
                    n,
                    improved
                );

                let active: Vec<usize> = (0..n)
                    .filter(|&i| trade_off.c[i] < C_UPPER_BOUND && state.lr[i] > 0.0)
                    .collect();
                if active.is_empty() {
                    break;
                }

                let direction = -objective.gradient(classifier, &state, &active)?;
                let outcome = search.step(classifier, &objective, &mut state, &active, &direction)?;
                debug!("Line search updated {} of {} active samples", outcome.updated, active.len());

                for (overall, &ok) in overall_success.iter_mut().zip(&state.success) {
                    *overall |= ok;
                }
            }

            let improved = best.record(&state);
            debug!("Round {} improved {} best distances", round + 1, improved);
            trade_off.update(&overall_success);
        }

        Ok(best.into_adversarial(&state.x))
    }
}
