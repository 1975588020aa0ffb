//! Builders for padding masks used to drop padded keys.
//!
//! Padding masks are derived from the key/value token sequence and are
//! shaped `[batch, 1, 1, k_len]` so they broadcast over heads and queries.

use candle_core::{Result, Tensor};

use super::{MASK_DTYPE, PAD_TOKEN_ID};

/// Flags every position of a `[batch, seq]` id tensor equal to the padding id.
pub fn build_padding_mask(token_ids: &Tensor) -> Result<Tensor> {
    let (batch, seq) = token_ids.dims2()?;
    token_ids
        .eq(PAD_TOKEN_ID)?
        .to_dtype(MASK_DTYPE)?
        .reshape((batch, 1, 1, seq))
}
