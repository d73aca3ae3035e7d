//! Carlini–Wagner evasion attacks.
//!
//! Two variants share one optimization engine:
//! - [`CarliniL2`]: smallest L2 perturbation, binary search over the trade-off
//!   constant between distortion and the classification margin
//! - [`CarliniLinf`]: any perturbation inside an L∞ ball of radius `eps`
//!
//! Both optimize in tanh space ([`transform`]) so that every candidate stays
//! inside the classifier's valid input range, and both take steps chosen by a
//! per-sample halving/doubling line search ([`line_search`]).
//!
//! ```no_run
//! use cw_attack::{CarliniL2, CarliniL2Config, EvasionAttack};
//! use cw_core::{labels::one_hot, ClipValues, LinearClassifier};
//! use ndarray::{ArrayD, IxDyn};
//!
//! let clf = LinearClassifier::random(vec![8], 3, ClipValues::scalar(0.0, 1.0)?, 0)?;
//! let x = ArrayD::from_elem(IxDyn(&[4, 8]), 0.5_f32);
//! let y = one_hot(&[2, 2, 2, 2], 3)?;
//! let attack = CarliniL2::new(CarliniL2Config::default())?;
//! let output = attack.generate(&clf, &x, Some(&y))?;
//! println!("success rate: {:.2}", output.success_rate);
//! # Ok::<(), cw_core::CwError>(())
//! ```

pub mod attack;
pub mod config;
pub mod driver;
pub mod l2;
pub mod line_search;
pub mod linf;
pub mod loss;
pub mod state;
pub mod transform;

pub use attack::{AttackOutput, EvasionAttack};
pub use config::{CarliniL2Config, CarliniLinfConfig};
pub use driver::{batch_ranges, success_rate};
pub use l2::{CarliniL2, TradeOff, C_UPPER_BOUND};
pub use line_search::{LineSearch, LineSearchOutcome};
pub use linf::CarliniLinf;
pub use loss::{MarginLoss, Objective};

pub use cw_core::{Classifier, ClipValues, CwError, Result};

#[cfg(test)]
mod tests;
