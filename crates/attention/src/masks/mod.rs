//! Mask utilities shared by attention implementations.
//!
//! All masks produced here have dtype `f32` and hold `1.0` where attention
//! must be suppressed and `0.0` elsewhere. Padding masks are shaped
//! `[batch, 1, 1, k_len]` and causal masks `[len, len]`; both broadcast
//! against `[batch, num_heads, q_len, k_len]` scores.

pub mod causal;
pub mod padding;

use candle_core::{DType, Result, Tensor};

/// Dtype shared by all masks.
pub const MASK_DTYPE: DType = DType::F32;

/// Token id reserved for padding.
pub const PAD_TOKEN_ID: u32 = 0;

pub use causal::build_causal_mask;
pub use padding::build_padding_mask;

/// Combines two masks so a position is suppressed if either suppresses it.
pub fn combine_masks(lhs: &Tensor, rhs: &Tensor) -> Result<Tensor> {
    lhs.broadcast_maximum(rhs)
}
