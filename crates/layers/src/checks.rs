//! Lightweight validation helpers shared across layer components.
//!
//! These routines return `candle_core::Result<()>` so call sites can
//! propagate errors without panicking.

use candle_core::{Error, Result, Tensor};

/// Validates the `(batch, seq, hidden)` convention with a known hidden size.
pub fn expect_batch_seq_hidden(context: &str, tensor: &Tensor, hidden: usize) -> Result<()> {
    match tensor.dims() {
        [_, _, actual_hidden] if *actual_hidden == hidden => Ok(()),
        dims => Err(Error::Msg(format!(
            "{context}: expected (batch, seq, {hidden}) layout, got {dims:?}"
        ))),
    }
}

/// Ensures a rate lies in `[0, 1)`.
pub fn expect_probability(context: &str, value: f32) -> Result<()> {
    if (0.0..1.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::Msg(format!(
            "{context}: probability must be in [0, 1), got {value}"
        )))
    }
}
