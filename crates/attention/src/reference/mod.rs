//! Portable, exact attention kernels.
//!
//! These paths favour clarity over absolute performance and are composed
//! entirely from differentiable tensor ops.

pub mod exact;

pub use exact::ScaledDotProductAttention;
