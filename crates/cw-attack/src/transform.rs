//! Change of variables between a box `[lo, hi]` and unconstrained tanh space.
//!
//! `u = atanh(s · (2 (clip(x, lo, hi) - lo) / (hi - lo) - 1))` and back
//! `x = (tanh(u) / s + 1) / 2 · (hi - lo) + lo`, with `s = TANH_SMOOTHER`.
//! The smoother keeps the `atanh` argument strictly inside `(-1, 1)` so that
//! points on the box boundary map to finite coordinates.
//!
//! Arithmetic is carried out in f64 and stored as f32. Degenerate boxes
//! (`hi == lo`) map every point to `u = 0` and back to `lo`.

use ndarray::{ArrayD, Zip};

/// Scale applied to the `atanh` argument.
pub const TANH_SMOOTHER: f64 = 0.999999;

/// Map a point of `[lo, hi]` to tanh space. Inputs outside the box are clipped first.
#[inline]
pub fn to_tanh_scalar(x: f32, lo: f32, hi: f32) -> f32 {
    let width = hi as f64 - lo as f64;
    if width <= 0.0 {
        return 0.0;
    }
    let t = (x.clamp(lo, hi) as f64 - lo as f64) / width;
    ((2.0 * t - 1.0) * TANH_SMOOTHER).atanh() as f32
}

/// Map a tanh-space coordinate back into `[lo, hi]`.
#[inline]
pub fn from_tanh_scalar(u: f32, lo: f32, hi: f32) -> f32 {
    let width = hi as f64 - lo as f64;
    let t = ((u as f64).tanh() / TANH_SMOOTHER + 1.0) / 2.0;
    ((t * width + lo as f64) as f32).clamp(lo, hi)
}

/// Derivative `dx/du` of [`from_tanh_scalar`].
#[inline]
pub fn tanh_jacobian_scalar(u: f32, lo: f32, hi: f32) -> f32 {
    let width = hi as f64 - lo as f64;
    let tanh = (u as f64).tanh();
    (width * (1.0 - tanh * tanh) / (2.0 * TANH_SMOOTHER)) as f32
}

/// Element-wise [`to_tanh_scalar`]. All arrays share one shape.
pub fn to_tanh(x: &ArrayD<f32>, lower: &ArrayD<f32>, upper: &ArrayD<f32>) -> ArrayD<f32> {
    Zip::from(x)
        .and(lower)
        .and(upper)
        .map_collect(|&x, &lo, &hi| to_tanh_scalar(x, lo, hi))
}

/// Element-wise [`from_tanh_scalar`]. All arrays share one shape.
pub fn from_tanh(u: &ArrayD<f32>, lower: &ArrayD<f32>, upper: &ArrayD<f32>) -> ArrayD<f32> {
    Zip::from(u)
        .and(lower)
        .and(upper)
        .map_collect(|&u, &lo, &hi| from_tanh_scalar(u, lo, hi))
}

/// Element-wise [`tanh_jacobian_scalar`]. All arrays share one shape.
pub fn tanh_jacobian(u: &ArrayD<f32>, lower: &ArrayD<f32>, upper: &ArrayD<f32>) -> ArrayD<f32> {
    Zip::from(u)
        .and(lower)
        .and(upper)
        .map_collect(|&u, &lo, &hi| tanh_jacobian_scalar(u, lo, hi))
}
