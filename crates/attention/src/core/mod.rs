//! Core traits and types shared across attention implementations.
//!
//! Implementations operate on tensors with layout
//! `[batch, n_heads, seq_len, head_dim]` and return both the attended values
//! and the post-softmax weights, the latter retained only for introspection.

pub mod config;
pub mod errors;

use candle_core::Tensor;

pub use config::{Config, DEFAULT_MASK_PENALTY};
pub use errors::AttentionError;

/// Result of a single attention call.
#[derive(Debug, Clone)]
pub struct AttentionOutput {
    /// Weighted sum of values, `[batch, n_heads, q_len, head_dim]`.
    pub output: Tensor,
    /// Softmax weights, `[batch, n_heads, q_len, k_len]`.
    pub weights: Tensor,
}

/// Unified interface for attention kernels.
///
/// * `q` is `[.., q_len, d_k]`, `k` is `[.., k_len, d_k]`, `v` is `[.., k_len, d_v]`.
/// * `mask`, when present, holds `1.0` at suppressed positions and must
///   broadcast to `[.., q_len, k_len]`.
/// * When [`Config::causal`] is set the kernel merges a look-ahead mask over
///   `k_len` into `mask` by elementwise maximum.
/// * Shape mismatches surface as [`AttentionError::Backend`] from the
///   underlying tensor op; there is no separate validation pass.
pub trait Attention {
    fn attend(
        &self,
        q: &Tensor,
        k: &Tensor,
        v: &Tensor,
        mask: Option<&Tensor>,
        config: &Config,
    ) -> Result<AttentionOutput, AttentionError>;
}
