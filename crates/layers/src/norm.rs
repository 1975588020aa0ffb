//! Layer normalisation with learnable scale and shift.
//!
//! Inputs follow the `(batch, seq, hidden)` convention. Statistics are taken
//! over the last axis and the original layout is preserved. The computation
//! is composed from differentiable tensor ops so gradients reach both the
//! input and the affine parameters.

use candle_core::{Device, Result, Tensor, Var, D};

use crate::{
    checks,
    params::{scoped, Parameterized},
};

/// Configuration for a layer-norm instance.
#[derive(Debug, Clone, PartialEq)]
pub struct NormConfig {
    /// Size of the hidden dimension being normalised.
    pub hidden_size: usize,
    /// Numeric stabiliser added to the variance.
    pub epsilon: f64,
}

impl NormConfig {
    /// Creates a configuration with the stabiliser used throughout the model.
    pub fn new(hidden_size: usize) -> Self {
        Self {
            hidden_size,
            epsilon: 1e-6,
        }
    }
}

/// Standard LayerNorm: `gamma * (x - mean) / sqrt(var + eps) + beta`.
#[derive(Debug, Clone)]
pub struct LayerNorm {
    config: NormConfig,
    weight: Var,
    bias: Var,
}

impl LayerNorm {
    /// Builds a norm with unit scale and zero shift.
    pub fn new(config: NormConfig, device: &Device) -> Result<Self> {
        let weight = Var::ones(config.hidden_size, candle_core::DType::F32, device)?;
        let bias = Var::zeros(config.hidden_size, candle_core::DType::F32, device)?;
        Ok(Self {
            config,
            weight,
            bias,
        })
    }

    pub fn config(&self) -> &NormConfig {
        &self.config
    }

    pub fn forward(&self, hidden: &Tensor) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("norm.input", hidden, self.config.hidden_size)?;

        let mean = hidden.mean_keepdim(D::Minus1)?;
        let centered = hidden.broadcast_sub(&mean)?;
        let variance = centered.sqr()?.mean_keepdim(D::Minus1)?;
        let denom = (variance + self.config.epsilon)?.sqrt()?;
        let normalized = centered.broadcast_div(&denom)?;

        normalized
            .broadcast_mul(self.weight.as_tensor())?
            .broadcast_add(self.bias.as_tensor())
    }
}

impl Parameterized for LayerNorm {
    fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        vec![
            (scoped(scope, "gamma"), self.weight.clone()),
            (scoped(scope, "beta"), self.bias.clone()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_rows_are_standardised() -> Result<()> {
        let device = Device::Cpu;
        let norm = LayerNorm::new(NormConfig::new(8), &device)?;
        let input = Tensor::randn(3f32, 2.0, (2, 4, 8), &device)?;
        let output = norm.forward(&input)?;

        let mean = output.mean_keepdim(D::Minus1)?.abs()?.max_all()?.to_vec0::<f32>()?;
        assert!(mean < 1e-4, "row mean {mean}");
        let var = output
            .sqr()?
            .mean_keepdim(D::Minus1)?
            .flatten_all()?
            .to_vec1::<f32>()?;
        assert!(var.iter().all(|v| (v - 1.0).abs() < 1e-3));
        Ok(())
    }

    #[test]
    fn rejects_wrong_hidden_size() -> Result<()> {
        let device = Device::Cpu;
        let norm = LayerNorm::new(NormConfig::new(8), &device)?;
        let input = Tensor::zeros((1, 2, 4), candle_core::DType::F32, &device)?;
        assert!(norm.forward(&input).is_err());
        Ok(())
    }
}
