//! Splits inputs into batches, runs an attack per batch and scores the result.

use crate::attack::{AttackOutput, EvasionAttack};
use cw_core::labels::{argmax_rows, labels_from_predictions};
use cw_core::{Classifier, CwError, Result};
use ndarray::{Array2, ArrayD, Axis, Slice};
use std::ops::Range;
use tracing::{debug, info};

/// Contiguous index ranges of at most `batch_size` samples covering `0..len`.
pub fn batch_ranges(len: usize, batch_size: usize) -> Result<Vec<Range<usize>>> {
    if batch_size == 0 {
        return Err(CwError::InvalidConfig("batch_size must be positive".to_string()));
    }
    Ok((0..len)
        .step_by(batch_size)
        .map(|start| start..(start + batch_size).min(len))
        .collect())
}

/// Fraction of samples whose adversarial prediction meets the attack goal.
///
/// Targeted: the prediction equals the target class. Untargeted: the
/// prediction differs from the prediction on the original input.
pub fn success_rate<C: Classifier + ?Sized>(
    classifier: &C,
    x: &ArrayD<f32>,
    x_adv: &ArrayD<f32>,
    targets: &Array2<f32>,
    targeted: bool,
) -> Result<f32> {
    let n = x_adv.shape().first().copied().unwrap_or(0);
    if n == 0 {
        return Ok(0.0);
    }
    let adv_preds = argmax_rows(&classifier.predict(x_adv, true)?);
    let reference = if targeted {
        argmax_rows(targets)
    } else {
        argmax_rows(&classifier.predict(x, true)?)
    };
    let hits = adv_preds
        .iter()
        .zip(&reference)
        .filter(|(a, r)| (a == r) == targeted)
        .count();
    Ok(hits as f32 / n as f32)
}

/// Run `attack` over `x` in batches of `attack.batch_size()`.
pub fn generate<A, C>(
    attack: &A,
    classifier: &C,
    x: &ArrayD<f32>,
    y: Option<&Array2<f32>>,
) -> Result<AttackOutput>
where
    A: EvasionAttack + ?Sized,
    C: Classifier + ?Sized,
{
    if attack.targeted() && y.is_none() {
        return Err(CwError::MissingTargets);
    }
    let batch_size = attack.batch_size();
    if batch_size == 0 {
        return Err(CwError::InvalidConfig("batch_size must be positive".to_string()));
    }
    if x.ndim() < 2 {
        return Err(CwError::ShapeMismatch {
            expected: vec![x.len(), 1],
            got: x.shape().to_vec(),
        });
    }
    let n = x.shape()[0];
    let num_classes = classifier.num_classes();
    if let Some(y) = y {
        if y.dim() != (n, num_classes) {
            return Err(CwError::shape_mismatch(&[n, num_classes], y.shape()));
        }
    }
    if n == 0 {
        return Ok(AttackOutput {
            adversarial: x.clone(),
            success_rate: 0.0,
            num_batches: 0,
        });
    }

    let targets = match y {
        Some(y) => y.clone(),
        None => labels_from_predictions(&classifier.predict(x, false)?),
    };

    let ranges = batch_ranges(n, batch_size)?;
    let mut adversarial = x.clone();
    for (batch, range) in ranges.iter().enumerate() {
        debug!(
            "Processing batch {} of {} ({} samples)",
            batch + 1,
            ranges.len(),
            range.len()
        );
        let slice = Slice::from(range.clone());
        let x_batch = x.slice_axis(Axis(0), slice).to_owned();
        let y_batch = targets.slice_axis(Axis(0), slice).to_owned();
        let x_adv = attack.attack_batch(classifier, &x_batch, &y_batch)?;
        if x_adv.shape() != x_batch.shape() {
            return Err(CwError::shape_mismatch(x_batch.shape(), x_adv.shape()));
        }
        adversarial.slice_axis_mut(Axis(0), slice).assign(&x_adv);
    }

    let rate = success_rate(classifier, x, &adversarial, &targets, attack.targeted())?;
    info!("Success rate of {} attack: {:.2}%", attack.name(), 100.0 * rate);

    Ok(AttackOutput {
        adversarial,
        success_rate: rate,
        num_batches: ranges.len(),
    })
}
