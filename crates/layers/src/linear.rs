//! Dense affine projections.
//!
//! Linear layers accept inputs shaped `(batch, seq, in_dim)` or
//! `(rows, in_dim)` and return the same leading layout with `out_dim`
//! features. Weights are stored `(out_dim, in_dim)` and applied as
//! `x · Wᵀ + b`.

use candle_core::{DType, Device, Error, Result, Tensor, Var};

use crate::params::{scoped, Parameterized};

/// Dimensions of a dense projection layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearConfig {
    /// Incoming feature dimension.
    pub input_dim: usize,
    /// Output feature dimension.
    pub output_dim: usize,
}

impl LinearConfig {
    pub fn new(input_dim: usize, output_dim: usize) -> Self {
        Self {
            input_dim,
            output_dim,
        }
    }
}

/// Dense affine projection `x · Wᵀ + b`.
#[derive(Debug, Clone)]
pub struct Linear {
    config: LinearConfig,
    weight: Var,
    bias: Var,
}

impl Linear {
    /// Glorot-uniform weights bounded by `sqrt(6 / (fan_in + fan_out))` and a
    /// zero bias.
    pub fn xavier_uniform(config: LinearConfig, device: &Device) -> Result<Self> {
        if config.input_dim == 0 || config.output_dim == 0 {
            return Err(Error::Msg(format!(
                "linear dimensions must be non-zero, got {} -> {}",
                config.input_dim, config.output_dim
            )));
        }
        let bound = (6.0f64 / (config.input_dim + config.output_dim) as f64).sqrt() as f32;
        let weight = Var::rand(
            -bound,
            bound,
            (config.output_dim, config.input_dim),
            device,
        )?;
        let bias = Var::zeros(config.output_dim, DType::F32, device)?;
        Ok(Self {
            config,
            weight,
            bias,
        })
    }

    pub fn forward(&self, hidden: &Tensor) -> Result<Tensor> {
        let weight_t = self.weight.as_tensor().t()?;
        let output = match hidden.dims() {
            [batch, seq, _] => {
                let (batch, seq) = (*batch, *seq);
                let flat = hidden.reshape((batch * seq, self.config.input_dim))?;
                flat.matmul(&weight_t)?
                    .reshape((batch, seq, self.config.output_dim))?
            }
            [_, _] => hidden.matmul(&weight_t)?,
            dims => {
                return Err(Error::Msg(format!(
                    "linear expects input shaped [B, T, H_in] or [T, H_in], got {dims:?}"
                )))
            }
        };
        output.broadcast_add(self.bias.as_tensor())
    }
}

impl Parameterized for Linear {
    fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        vec![
            (scoped(scope, "weight"), self.weight.clone()),
            (scoped(scope, "bias"), self.bias.clone()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parameter(linear: &Linear, name: &str) -> Tensor {
        linear
            .named_parameters("proj")
            .into_iter()
            .find(|(param, _)| param == name)
            .map(|(_, var)| var.as_tensor().clone())
            .unwrap()
    }

    #[test]
    fn forward_matches_reference() -> Result<()> {
        let device = Device::Cpu;
        let linear = Linear::xavier_uniform(LinearConfig::new(8, 4), &device)?;
        let weight = parameter(&linear, "proj.weight");
        let bias = parameter(&linear, "proj.bias");

        let input = Tensor::randn(0f32, 1.0, (2, 5, 8), &device)?;
        let output = linear.forward(&input)?;
        assert_eq!(output.dims(), &[2, 5, 4]);

        let reference = input
            .reshape((10, 8))?
            .matmul(&weight.t()?)?
            .broadcast_add(&bias)?
            .reshape((2, 5, 4))?;
        let diff = output.sub(&reference)?.abs()?.max_all()?.to_vec0::<f32>()?;
        assert!(diff <= 1e-5, "max diff {diff}");
        Ok(())
    }

    #[test]
    fn glorot_uniform_respects_bound() -> Result<()> {
        let linear = Linear::xavier_uniform(LinearConfig::new(64, 32), &Device::Cpu)?;
        let bound = (6.0f32 / 96.0).sqrt();
        let values = parameter(&linear, "proj.weight")
            .flatten_all()?
            .to_vec1::<f32>()?;
        assert!(values.iter().all(|v| v.abs() <= bound));
        let bias = parameter(&linear, "proj.bias");
        assert_eq!(bias.sum_all()?.to_vec0::<f32>()?, 0.0);
        Ok(())
    }

    #[test]
    fn named_parameters_include_bias() -> Result<()> {
        let linear = Linear::xavier_uniform(LinearConfig::new(4, 4), &Device::Cpu)?;
        let names: Vec<String> = linear
            .named_parameters("proj")
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["proj.weight", "proj.bias"]);
        assert_eq!(linear.parameter_count(), 20);
        Ok(())
    }

    #[test]
    fn rejects_zero_width() {
        let err = Linear::xavier_uniform(LinearConfig::new(0, 3), &Device::Cpu).unwrap_err();
        assert!(err.to_string().contains("non-zero"));
    }

    #[test]
    fn rejects_unsupported_rank() -> Result<()> {
        let linear = Linear::xavier_uniform(LinearConfig::new(4, 2), &Device::Cpu)?;
        let input = Tensor::zeros(4, DType::F32, &Device::Cpu)?;
        assert!(linear.forward(&input).is_err());
        Ok(())
    }
}
