//! Carlini–Wagner L∞ attack.
//!
//! Each sample is optimized inside its own box `[x - eps, x + eps]`
//! intersected with the classifier's valid range. The objective is the
//! margin alone; a sample stops being optimized as soon as it succeeds.
//! Samples that never succeed are returned unmodified.

use crate::attack::EvasionAttack;
use crate::config::CarliniLinfConfig;
use crate::line_search::LineSearch;
use crate::loss::{MarginLoss, Objective};
use crate::state::{assign_rows, mean, BatchState};
use cw_core::{Classifier, Result};
use ndarray::{Array2, ArrayD, Axis, Zip};
use tracing::debug;

/// Carlini–Wagner attack bounded in L∞ norm.
#[derive(Debug, Clone)]
pub struct CarliniLinf {
    config: CarliniLinfConfig,
}

impl CarliniLinf {
    pub fn new(config: CarliniLinfConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &CarliniLinfConfig {
        &self.config
    }

    /// Per-element box `[max(lo, x - eps), min(hi, x + eps)]`, clamped into `[lo, hi]`.
    pub fn perturbation_box<C: Classifier + ?Sized>(
        &self,
        classifier: &C,
        x: &ArrayD<f32>,
    ) -> Result<(ArrayD<f32>, ArrayD<f32>)> {
        let eps = self.config.eps;
        let (lo, hi) = classifier.clip_values().broadcast_to(x.shape())?;
        let lower = Zip::from(x)
            .and(&lo)
            .and(&hi)
            .map_collect(|&v, &l, &u| (v - eps).max(l).min(u));
        let upper = Zip::from(x)
            .and(&lo)
            .and(&hi)
            .map_collect(|&v, &l, &u| (v + eps).max(l).min(u));
        Ok((lower, upper))
    }
}

impl EvasionAttack for CarliniLinf {
    fn name(&self) -> &'static str {
        "C&W L-inf"
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
        let (lower, upper) = self.perturbation_box(classifier, x)?;
        let mut state = BatchState::new(x, lower, upper, targets.clone(), cfg.learning_rate)?;
        let objective = Objective::margin_only(MarginLoss::new(cfg.confidence, cfg.targeted));
        let search = LineSearch::new(cfg.max_halving, cfg.max_doubling);

        state.evaluate_all(classifier, &objective)?;
        for iteration in 0..cfg.max_iter {
            debug!(
                "Iteration {} of {}: loss {:.6}, {} of {} succeeded",
                iteration + 1,
                cfg.max_iter,
                mean(&state.loss),
                state.num_success(),
                n
            );
            let active: Vec<usize> = (0..n).filter(|&i| !state.success[i]).collect();
            if active.is_empty() {
                break;
            }

            let direction = -objective.gradient(classifier, &state, &active)?;
            let outcome = search.step(classifier, &objective, &mut state, &active, &direction)?;
            debug!("Line search updated {} of {} active samples", outcome.updated, active.len());
        }

        let failed: Vec<usize> = (0..n).filter(|&i| !state.success[i]).collect();
        debug!("{} of {} samples reverted to the original input", failed.len(), n);
        let mut out = state.x_adv;
        assign_rows(&mut out, &failed, &x.select(Axis(0), &failed));
        Ok(out)
    }
}
