//! Reference scaled dot-product attention.
//!
//! Computes `softmax(Q·Kᵀ / sqrt(d_k) - penalty · mask) · V` and returns the
//! weights alongside the output. If every key in a row is masked, the
//! penalty shifts all scores equally and the row degrades to a uniform
//! distribution over the masked keys; callers must avoid fully padded rows.

use std::sync::OnceLock;

use candle_core::{Tensor, D};
use candle_nn::ops::softmax;

use crate::core::{Attention, AttentionError, AttentionOutput, Config};
use crate::masks::{build_causal_mask, combine_masks};

/// Stateless reference kernel.
#[derive(Debug, Default)]
pub struct ScaledDotProductAttention {
    first_call: OnceLock<()>,
}

impl ScaledDotProductAttention {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Attention for ScaledDotProductAttention {
    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mask: Option<&Tensor>,
        config: &Config,
    ) -> Result<AttentionOutput, AttentionError> {
        if !config.mask_penalty.is_finite() || config.mask_penalty <= 0.0 {
            return Err(AttentionError::InvalidConfig {
                context: format!(
                    "mask penalty must be positive and finite, got {}",
                    config.mask_penalty
                ),
            });
        }

        if self.first_call.set(()).is_ok() {
            log::debug!(
                "attention::reference init causal={} mask_penalty={:e} q={:?} k={:?}",
                config.causal,
                config.mask_penalty,
                q.dims(),
                k.dims()
            );
        }

        let d_k = k.dim(D::Minus1)?;
        let k_t = k.transpose(D::Minus2, D::Minus1)?.contiguous()?;
        let scores = q.contiguous()?.matmul(&k_t)?;
        let mut scores = (scores / (d_k as f64).sqrt())?;

        let causal = if config.causal {
            let k_len = k.dim(D::Minus2)?;
            Some(build_causal_mask(k.device(), k_len)?)
        } else {
            None
        };
        let combined = match (mask, causal.as_ref()) {
            (Some(mask), Some(causal)) => Some(combine_masks(mask, causal)?),
            (Some(mask), None) => Some(mask.clone()),
            (None, Some(causal)) => Some(causal.clone()),
            (None, None) => None,
        };
        if let Some(mask) = combined {
            let penalty = (mask * config.mask_penalty)?;
            scores = scores.broadcast_sub(&penalty)?;
        }

        let weights = softmax(&scores, D::Minus1)?;
        let output = weights.matmul(&v.contiguous()?)?;
        Ok(AttentionOutput { output, weights })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::masks::build_padding_mask;
    use candle_core::{DType, Device, Result as CandleResult};

    fn build_inputs(device: &Device) -> CandleResult<(Tensor, Tensor, Tensor)> {
        let data: Vec<f32> = (0..64).map(|i| ((i * 7 % 13) as f32) * 0.1).collect();
        let q = Tensor::from_vec(data.clone(), (1, 2, 4, 8), device)?;
        let k = Tensor::from_vec(data.iter().rev().copied().collect(), (1, 2, 4, 8), device)?;
        let v = Tensor::from_vec(data, (1, 2, 4, 8), device)?;
        Ok((q, k, v))
    }

    fn naive_attention(
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        causal: bool,
    ) -> CandleResult<Vec<f32>> {
        let (batch, heads, q_len, head_dim) = q.dims4()?;
        let k_len = k.dim(2)?;
        let q_vec = q.flatten_all()?.to_vec1::<f32>()?;
        let k_vec = k.flatten_all()?.to_vec1::<f32>()?;
        let v_vec = v.flatten_all()?.to_vec1::<f32>()?;
        let scale = 1.0 / (head_dim as f32).sqrt();
        let mut output = vec![0f32; batch * heads * q_len * head_dim];

        for bh in 0..batch * heads {
            for qi in 0..q_len {
                let visible = if causal { qi + 1 } else { k_len };
                let mut row = vec![0f32; visible];
                for (ki, slot) in row.iter_mut().enumerate() {
                    let mut dot = 0f32;
                    for d in 0..head_dim {
                        dot += q_vec[(bh * q_len + qi) * head_dim + d]
                            * k_vec[(bh * k_len + ki) * head_dim + d];
                    }
                    *slot = dot * scale;
                }
                let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                let exps: Vec<f32> = row.iter().map(|s| (s - max).exp()).collect();
                let denom: f32 = exps.iter().sum();
                for d in 0..head_dim {
                    let mut acc = 0f32;
                    for (ki, e) in exps.iter().enumerate() {
                        acc += e / denom * v_vec[(bh * k_len + ki) * head_dim + d];
                    }
                    output[(bh * q_len + qi) * head_dim + d] = acc;
                }
            }
        }
        Ok(output)
    }

    #[test]
    fn matches_naive_causal_attention() -> CandleResult<()> {
        let device = Device::Cpu;
        let (q, k, v) = build_inputs(&device)?;
        let attention = ScaledDotProductAttention::new();
        let result = attention
            .attend(&q, &k, &v, None, &Config::causal())
            .unwrap();
        assert_eq!(result.output.dims(), &[1, 2, 4, 8]);
        assert_eq!(result.weights.dims(), &[1, 2, 4, 4]);

        let expected = naive_attention(&q, &k, &v, true)?;
        let actual = result.output.flatten_all()?.to_vec1::<f32>()?;
        for (a, e) in actual.iter().zip(expected.iter()) {
            assert!((a - e).abs() < 1e-4, "{a} vs {e}");
        }
        Ok(())
    }

    #[test]
    fn causal_weights_vanish_above_diagonal() -> CandleResult<()> {
        let device = Device::Cpu;
        let q = Tensor::randn(0f32, 1.0, (2, 3, 6, 4), &device)?;
        let k = Tensor::randn(0f32, 1.0, (2, 3, 6, 4), &device)?;
        let v = Tensor::randn(0f32, 1.0, (2, 3, 6, 4), &device)?;
        let result = ScaledDotProductAttention::new()
            .attend(&q, &k, &v, None, &Config::causal())
            .unwrap();

        let weights = result.weights.flatten_all()?.to_vec1::<f32>()?;
        for row in 0..(2 * 3 * 6) {
            let qi = row % 6;
            for kj in 0..6 {
                let w = weights[row * 6 + kj];
                if kj > qi {
                    assert!(w.abs() < 1e-12, "q={qi} k={kj} weight={w}");
                }
            }
        }
        Ok(())
    }

    #[test]
    fn padded_keys_receive_zero_weight() -> CandleResult<()> {
        let device = Device::Cpu;
        let ids = Tensor::from_slice(&[5u32, 6, 0, 0, 2, 3, 4, 0], (2, 4), &device)?;
        let mask = build_padding_mask(&ids)?;
        let q = Tensor::randn(0f32, 1.0, (2, 2, 3, 4), &device)?;
        let k = Tensor::randn(0f32, 1.0, (2, 2, 4, 4), &device)?;
        let v = Tensor::randn(0f32, 1.0, (2, 2, 4, 4), &device)?;
        let result = ScaledDotProductAttention::new()
            .attend(&q, &k, &v, Some(&mask), &Config::default())
            .unwrap();

        let weights = result.weights.to_dtype(DType::F32)?;
        let padded = [(0usize, 2usize), (0, 3), (1, 3)];
        for (b, key) in padded {
            let column = weights.get(b)?.narrow(2, key, 1)?;
            let max = column.abs()?.max_all()?.to_vec0::<f32>()?;
            assert!(max < 1e-12, "batch {b} key {key} weight {max}");
        }
        let sums = weights.sum(3)?.flatten_all()?.to_vec1::<f32>()?;
        assert!(sums.iter().all(|s| (s - 1.0).abs() < 1e-5));
        Ok(())
    }

    #[test]
    fn numerical_stability() {
        let device = Device::Cpu;
        let q = Tensor::full(10_000.0f32, (1, 1, 4, 4), &device).unwrap();
        let k = Tensor::full(-10_000.0f32, (1, 1, 4, 4), &device).unwrap();
        let v = Tensor::ones((1, 1, 4, 4), DType::F32, &device).unwrap();
        let out = ScaledDotProductAttention::new()
            .attend(&q, &k, &v, None, &Config::causal())
            .unwrap()
            .output
            .flatten_all()
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert!(out.iter().all(|value| value.is_finite()));
    }

    #[test]
    fn mismatched_shapes_surface_backend_error() {
        let device = Device::Cpu;
        let q = Tensor::zeros((1, 2, 4, 8), DType::F32, &device).unwrap();
        let k = Tensor::zeros((1, 2, 4, 6), DType::F32, &device).unwrap();
        let v = Tensor::zeros((1, 2, 4, 8), DType::F32, &device).unwrap();
        let err = ScaledDotProductAttention::new()
            .attend(&q, &k, &v, None, &Config::default())
            .unwrap_err();
        assert!(matches!(err, AttentionError::Backend(_)));
    }

    #[test]
    fn rejects_non_finite_penalty() {
        let device = Device::Cpu;
        let q = Tensor::zeros((1, 1, 2, 2), DType::F32, &device).unwrap();
        let config = Config {
            mask_penalty: f64::INFINITY,
            ..Config::default()
        };
        let err = ScaledDotProductAttention::new()
            .attend(&q, &q, &q, None, &config)
            .unwrap_err();
        assert!(matches!(err, AttentionError::InvalidConfig { .. }));
    }
}
