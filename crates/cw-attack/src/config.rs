//! Attack hyperparameters.

use cw_core::{CwError, Result};
use serde::{Deserialize, Serialize};

/// Configuration of [`CarliniL2`](crate::CarliniL2).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CarliniL2Config {
    /// Required logit margin beyond the decision boundary.
    pub confidence: f32,
    /// Reach the given class (true) or leave it (false).
    pub targeted: bool,
    /// Initial line search step size.
    pub learning_rate: f32,
    /// Outer iterations per binary search round.
    pub max_iter: usize,
    /// Rounds of the binary search over the trade-off constant.
    pub binary_search_steps: usize,
    /// Starting trade-off constant.
    pub initial_const: f32,
    pub max_halving: usize,
    pub max_doubling: usize,
    pub batch_size: usize,
}

impl Default for CarliniL2Config {
    fn default() -> Self {
        Self {
            confidence: 0.0,
            targeted: true,
            learning_rate: 0.01,
            max_iter: 10,
            binary_search_steps: 10,
            initial_const: 0.01,
            max_halving: 5,
            max_doubling: 5,
            batch_size: 128,
        }
    }
}

impl CarliniL2Config {
    /// Short search: fewer binary search rounds and iterations.
    pub fn fast() -> Self {
        Self {
            max_iter: 5,
            binary_search_steps: 5,
            ..Self::default()
        }
    }

    /// Long search for the smallest perturbation.
    pub fn thorough() -> Self {
        Self {
            max_iter: 100,
            binary_search_steps: 20,
            max_halving: 10,
            max_doubling: 10,
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        check_confidence(self.confidence)?;
        check_positive("learning_rate", self.learning_rate)?;
        check_positive("initial_const", self.initial_const)?;
        check_search(self.max_halving, self.max_doubling, self.batch_size)
    }
}

/// Configuration of [`CarliniLinf`](crate::CarliniLinf).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CarliniLinfConfig {
    pub confidence: f32,
    pub targeted: bool,
    pub learning_rate: f32,
    pub max_iter: usize,
    pub max_halving: usize,
    pub max_doubling: usize,
    /// L∞ radius of the perturbation box around each sample.
    pub eps: f32,
    pub batch_size: usize,
}

impl Default for CarliniLinfConfig {
    fn default() -> Self {
        Self {
            confidence: 0.0,
            targeted: true,
            learning_rate: 0.01,
            max_iter: 10,
            max_halving: 5,
            max_doubling: 5,
            eps: 0.3,
            batch_size: 128,
        }
    }
}

impl CarliniLinfConfig {
    pub fn fast() -> Self {
        Self {
            max_iter: 5,
            ..Self::default()
        }
    }

    pub fn thorough() -> Self {
        Self {
            max_iter: 100,
            max_halving: 10,
            max_doubling: 10,
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        check_confidence(self.confidence)?;
        check_positive("learning_rate", self.learning_rate)?;
        check_positive("eps", self.eps)?;
        check_search(self.max_halving, self.max_doubling, self.batch_size)
    }
}

fn check_confidence(confidence: f32) -> Result<()> {
    if !confidence.is_finite() || confidence < 0.0 {
        return Err(CwError::InvalidConfig(format!(
            "confidence must be a non-negative finite number, got {confidence}"
        )));
    }
    Ok(())
}

fn check_positive(name: &str, value: f32) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(CwError::InvalidConfig(format!(
            "{name} must be strictly positive, got {value}"
        )));
    }
    Ok(())
}

fn check_search(max_halving: usize, max_doubling: usize, batch_size: usize) -> Result<()> {
    if max_halving < 1 {
        return Err(CwError::InvalidConfig(
            "the number of halving steps must be greater than zero".to_string(),
        ));
    }
    if max_doubling < 1 {
        return Err(CwError::InvalidConfig(
            "the number of doubling steps must be greater than zero".to_string(),
        ));
    }
    if batch_size < 1 {
        return Err(CwError::InvalidConfig(
            "the batch size must be greater than zero".to_string(),
        ));
    }
    Ok(())
}
