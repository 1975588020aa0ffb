//! Multi-head attention built on the reference kernel.
//!
//! Inputs are `(batch, seq, d_model)`. Each of `V`, `K` and `Q` goes through
//! its own projection, is split into `num_heads` heads of width
//! `d_model / num_heads`, attended per head, merged back and projected once
//! more.

use std::fmt;

use attention::{Attention, AttentionError, Config as AttentionConfig, ScaledDotProductAttention};
use candle_core::{bail, Device, Error, Result, Tensor, Var};
use layers::{
    checks,
    linear::{Linear, LinearConfig},
    params::{scoped, Parameterized},
};

pub struct MultiHeadAttention {
    d_model: usize,
    num_heads: usize,
    depth: usize,
    wq: Linear,
    wk: Linear,
    wv: Linear,
    dense: Linear,
    kernel: ScaledDotProductAttention,
    attention_config: AttentionConfig,
}

impl fmt::Debug for MultiHeadAttention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiHeadAttention")
            .field("d_model", &self.d_model)
            .field("num_heads", &self.num_heads)
            .field("causal", &self.attention_config.causal)
            .finish()
    }
}

impl MultiHeadAttention {
    /// Fails when `num_heads` is zero or does not divide `d_model`.
    pub fn new(d_model: usize, num_heads: usize, causal: bool, device: &Device) -> Result<Self> {
        if num_heads == 0 || d_model % num_heads != 0 {
            bail!("d_model ({d_model}) must be divisible by num_heads ({num_heads})");
        }
        let projection = || Linear::xavier_uniform(LinearConfig::new(d_model, d_model), device);
        let attention_config = AttentionConfig {
            causal,
            ..AttentionConfig::default()
        };
        Ok(Self {
            d_model,
            num_heads,
            depth: d_model / num_heads,
            wq: projection()?,
            wk: projection()?,
            wv: projection()?,
            dense: projection()?,
            kernel: ScaledDotProductAttention::new(),
            attention_config,
        })
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    pub fn is_causal(&self) -> bool {
        self.attention_config.causal
    }

    fn split_heads(&self, tensor: &Tensor) -> Result<Tensor> {
        checks::expect_batch_seq_hidden("mha.input", tensor, self.d_model)?;
        let (batch, seq, _) = tensor.dims3()?;
        tensor
            .reshape((batch, seq, self.num_heads, self.depth))?
            .transpose(1, 2)?
            .contiguous()
    }

    fn merge_heads(&self, tensor: &Tensor) -> Result<Tensor> {
        let (batch, _, seq, _) = tensor.dims4()?;
        tensor
            .transpose(1, 2)?
            .contiguous()?
            .reshape((batch, seq, self.d_model))
    }

    /// Returns the projected output `(batch, q_len, d_model)` and the
    /// attention weights `(batch, num_heads, q_len, k_len)`.
    pub fn forward(
        &self,
        v: &Tensor,
        k: &Tensor,
        q: &Tensor,
        mask: Option<&Tensor>,
    ) -> Result<(Tensor, Tensor)> {
        let q = self.split_heads(&self.wq.forward(q)?)?;
        let k = self.split_heads(&self.wk.forward(k)?)?;
        let v = self.split_heads(&self.wv.forward(v)?)?;

        let attended = self
            .kernel
            .attend(&q, &k, &v, mask, &self.attention_config)
            .map_err(into_candle)?;
        let merged = self.merge_heads(&attended.output)?;
        let output = self.dense.forward(&merged)?;
        Ok((output, attended.weights))
    }
}

fn into_candle(err: AttentionError) -> Error {
    match err {
        AttentionError::Backend(inner) => inner,
        other => Error::Msg(other.to_string()),
    }
}

impl Parameterized for MultiHeadAttention {
    fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let mut params = self.wq.named_parameters(&scoped(scope, "wq"));
        params.extend(self.wk.named_parameters(&scoped(scope, "wk")));
        params.extend(self.wv.named_parameters(&scoped(scope, "wv")));
        params.extend(self.dense.named_parameters(&scoped(scope, "dense")));
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_matches_query_shape() -> Result<()> {
        let device = Device::Cpu;
        for (d_model, heads) in [(8usize, 1usize), (8, 2), (12, 3), (16, 8)] {
            let mha = MultiHeadAttention::new(d_model, heads, false, &device)?;
            let q = Tensor::randn(0f32, 1.0, (2, 3, d_model), &device)?;
            let kv = Tensor::randn(0f32, 1.0, (2, 5, d_model), &device)?;
            let (output, weights) = mha.forward(&kv, &kv, &q, None)?;
            assert_eq!(output.dims(), q.dims());
            assert_eq!(weights.dims(), &[2, heads, 3, 5]);
        }
        Ok(())
    }

    #[test]
    fn rejects_indivisible_heads() {
        let err = MultiHeadAttention::new(10, 3, false, &Device::Cpu).unwrap_err();
        assert!(err.to_string().contains("divisible"));
    }

    #[test]
    fn causal_flag_hides_future_positions() -> Result<()> {
        let device = Device::Cpu;
        let mha = MultiHeadAttention::new(8, 2, true, &device)?;
        assert!(mha.is_causal());
        let x = Tensor::randn(0f32, 1.0, (1, 4, 8), &device)?;
        let (_, weights) = mha.forward(&x, &x, &x, None)?;
        let values = weights.flatten_all()?.to_vec1::<f32>()?;
        for (idx, w) in values.iter().enumerate() {
            let (q, k) = ((idx / 4) % 4, idx % 4);
            if k > q {
                assert_eq!(*w, 0.0, "q={q} k={k}");
            }
        }
        Ok(())
    }

    #[test]
    fn mismatched_widths_fail() -> Result<()> {
        let device = Device::Cpu;
        let mha = MultiHeadAttention::new(8, 2, false, &device)?;
        let q = Tensor::zeros((1, 2, 6), candle_core::DType::F32, &device)?;
        assert!(mha.forward(&q, &q, &q, None).is_err());
        Ok(())
    }

    #[test]
    fn registers_four_projections() -> Result<()> {
        let mha = MultiHeadAttention::new(8, 2, false, &Device::Cpu)?;
        let names: Vec<String> = mha
            .named_parameters("mha")
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names.len(), 8);
        assert!(names.contains(&"mha.wq.weight".to_string()));
        assert!(names.contains(&"mha.dense.bias".to_string()));
        assert_eq!(mha.parameter_count(), 4 * (8 * 8 + 8));
        Ok(())
    }
}
