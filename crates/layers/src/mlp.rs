//! Position-wise feed-forward block.
//!
//! Operates on hidden states shaped `(batch, seq, hidden)` and returns the
//! same layout. The first projection expands to `intermediate_size`, applies
//! a ReLU, and the second contracts back to the model width. Positions never
//! mix.

use candle_core::{Device, Result, Tensor, Var};

use crate::{
    linear::{Linear, LinearConfig},
    params::{scoped, Parameterized},
};

/// Configuration for a two-layer feed-forward network.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedForwardConfig {
    /// Model hidden size.
    pub hidden_size: usize,
    /// Width of the activation space.
    pub intermediate_size: usize,
}

impl FeedForwardConfig {
    pub fn new(hidden_size: usize, intermediate_size: usize) -> Self {
        Self {
            hidden_size,
            intermediate_size,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FeedForward {
    up: Linear,
    down: Linear,
}

impl FeedForward {
    /// Both projections start from Glorot-uniform weights.
    pub fn new(config: FeedForwardConfig, device: &Device) -> Result<Self> {
        let up = Linear::xavier_uniform(
            LinearConfig::new(config.hidden_size, config.intermediate_size),
            device,
        )?;
        let down = Linear::xavier_uniform(
            LinearConfig::new(config.intermediate_size, config.hidden_size),
            device,
        )?;
        Ok(Self { up, down })
    }

    pub fn forward(&self, hidden: &Tensor) -> Result<Tensor> {
        let activated = self.up.forward(hidden)?.relu()?;
        self.down.forward(&activated)
    }
}

impl Parameterized for FeedForward {
    fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let mut params = self.up.named_parameters(&scoped(scope, "up"));
        params.extend(self.down.named_parameters(&scoped(scope, "down")));
        params
    }
}
