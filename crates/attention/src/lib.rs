//! Scaled dot-product attention primitives for the transducer project.
//!
//! The crate defines a portable API for attention over tensors with layout
//! `[batch, n_heads, seq_len, head_dim]`. Queries may have a different
//! sequence length from keys and values (cross-attention); keys and values
//! must agree with each other.
//!
//! Masks here are multiplicative-flag tensors of `0.0` (keep) and `1.0`
//! (suppress), broadcastable to the `[batch, n_heads, q_len, k_len]` score
//! shape. Kernels turn them into a large-but-finite additive penalty before
//! the softmax, so a fully suppressed key receives an attention weight that
//! is numerically zero without ever producing non-finite values.

pub mod core;
pub mod masks;
pub mod reference;

pub use self::core::{Attention, AttentionError, AttentionOutput, Config};
pub use reference::ScaledDotProductAttention;
