//! Error types emitted by attention implementations.

use thiserror::Error;

/// Attention-specific error category.
#[derive(Debug, Error)]
pub enum AttentionError {
    /// The configuration cannot be honoured.
    #[error("invalid attention config: {context}")]
    InvalidConfig { context: String },
    /// A tensor-level failure, including shape mismatches between q, k and v.
    #[error("attention backend failure: {0}")]
    Backend(#[from] candle_core::Error),
}
