//! Fixed sinusoidal position embeddings.
//!
//! Entry `(0, pos, 2i)` holds `sin(pos / 10000^(2i / d_model))` and entry
//! `(0, pos, 2i + 1)` holds `cos` of the same angle. The table is built once
//! per `(max_positions, d_model)` and sliced to the active sequence length
//! on every call.

use candle_core::{bail, Device, Result, Tensor};

const BASE: f64 = 10_000.0;

/// Precomputed `(1, max_positions, d_model)` encoding table.
#[derive(Debug, Clone)]
pub struct SinusoidalEncoding {
    max_positions: usize,
    d_model: usize,
    table: Tensor,
}

impl SinusoidalEncoding {
    pub fn new(max_positions: usize, d_model: usize, device: &Device) -> Result<Self> {
        if max_positions == 0 || d_model == 0 {
            bail!("sinusoidal encoding requires non-zero positions and width, got ({max_positions}, {d_model})");
        }
        let values = encoding_values(max_positions, d_model);
        let table = Tensor::from_vec(values, (1, max_positions, d_model), device)?;
        log::debug!("built sinusoidal table positions={max_positions} d_model={d_model}");
        Ok(Self {
            max_positions,
            d_model,
            table,
        })
    }

    pub fn max_positions(&self) -> usize {
        self.max_positions
    }

    pub fn d_model(&self) -> usize {
        self.d_model
    }

    /// Full `(1, max_positions, d_model)` table.
    pub fn table(&self) -> &Tensor {
        &self.table
    }

    /// Leading `seq_len` rows of the table, shaped `(1, seq_len, d_model)`.
    pub fn slice(&self, seq_len: usize) -> Result<Tensor> {
        if seq_len > self.max_positions {
            bail!(
                "sequence length {seq_len} exceeds the {} encoded positions",
                self.max_positions
            );
        }
        self.table.narrow(1, 0, seq_len)
    }

    /// Adds the encoding to hidden states shaped `(batch, seq, d_model)`.
    pub fn apply(&self, hidden: &Tensor) -> Result<Tensor> {
        let (_, seq_len, _) = hidden.dims3()?;
        hidden.broadcast_add(&self.slice(seq_len)?)
    }
}

fn encoding_values(max_positions: usize, d_model: usize) -> Vec<f32> {
    let mut values = Vec::with_capacity(max_positions * d_model);
    for pos in 0..max_positions {
        for column in 0..d_model {
            let pair = (column / 2) * 2;
            let angle = pos as f64 / BASE.powf(pair as f64 / d_model as f64);
            let value = if column % 2 == 0 { angle.sin() } else { angle.cos() };
            values.push(value as f32);
        }
    }
    values
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_columns_share_frequency() {
        let values = encoding_values(3, 4);
        // pos 1, columns 2 and 3 use angle 1 / 10000^(2/4) = 0.01
        assert!((values[4 + 2] - 0.01f64.sin() as f32).abs() < 1e-7);
        assert!((values[4 + 3] - 0.01f64.cos() as f32).abs() < 1e-7);
    }
}
