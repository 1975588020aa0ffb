//! Builders for causal ("look-ahead") masks.

use candle_core::{Device, Result, Tensor};

/// Construct an `[len, len]` mask that is `1.0` strictly above the diagonal.
///
/// Row `q` therefore permits keys `0..=q` and suppresses every later key.
pub fn build_causal_mask(device: &Device, len: usize) -> Result<Tensor> {
    let mut data = vec![0f32; len * len];
    for q in 0..len {
        for k in (q + 1)..len {
            data[q * len + k] = 1.0;
        }
    }
    Tensor::from_vec(data, (len, len), device)
}
