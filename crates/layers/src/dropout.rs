//! Training/inference mode and the dropout layer that branches on it.
//!
//! Dropout draws a fresh Bernoulli mask on every [`ForwardMode::Training`]
//! call and rescales kept activations by `1 / (1 - rate)`. Under
//! [`ForwardMode::Inference`] it is the identity, so evaluation and
//! prediction are deterministic.

use candle_core::{Result, Tensor};
use candle_nn::ops::dropout;

use crate::checks;

/// Selects training or inference behaviour for a forward pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardMode {
    /// Stochastic layers are active.
    Training,
    /// Stochastic layers are disabled.
    Inference,
}

impl ForwardMode {
    pub fn is_training(self) -> bool {
        matches!(self, ForwardMode::Training)
    }
}

/// Inverted dropout with a fixed rate.
#[derive(Debug, Clone, Copy)]
pub struct Dropout {
    rate: f32,
}

impl Dropout {
    /// Builds a dropout layer; `rate` must lie in `[0, 1)`.
    pub fn new(rate: f32) -> Result<Self> {
        checks::expect_probability("dropout.rate", rate)?;
        Ok(Self { rate })
    }

    pub fn rate(&self) -> f32 {
        self.rate
    }

    pub fn forward(&self, input: &Tensor, mode: ForwardMode) -> Result<Tensor> {
        if mode.is_training() && self.rate > 0.0 {
            dropout(input, self.rate)
        } else {
            Ok(input.clone())
        }
    }
}
