use candle_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::model::START_TOKEN_ID;

/// Every vocabulary must hold both the pad and the start sentinel.
pub const MIN_VOCAB_SIZE: usize = START_TOKEN_ID as usize + 1;

fn default_dropout_rate() -> f32 {
    0.1
}

/// Hyperparameters fixing every parameter shape of a [`crate::Transformer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformerConfig {
    pub num_layers: usize,
    pub d_model: usize,
    pub num_heads: usize,
    pub dff: usize,
    pub input_vocab_size: usize,
    /// Vocabulary size of each output stream, in stream order.
    pub output_sizes: Vec<usize>,
    pub max_position_input: usize,
    pub max_position_target: usize,
    #[serde(default = "default_dropout_rate")]
    pub dropout_rate: f32,
}

impl TransformerConfig {
    /// Width of a single attention head.
    pub fn depth(&self) -> usize {
        self.d_model / self.num_heads.max(1)
    }

    pub fn num_streams(&self) -> usize {
        self.output_sizes.len()
    }

    /// Validate structural invariants before any parameter is allocated.
    pub fn validate(&self) -> Result<()> {
        let sizes = [
            ("num_layers", self.num_layers),
            ("d_model", self.d_model),
            ("num_heads", self.num_heads),
            ("dff", self.dff),
            ("input_vocab_size", self.input_vocab_size),
            ("max_position_input", self.max_position_input),
            ("max_position_target", self.max_position_target),
        ];
        for (name, value) in sizes {
            if value == 0 {
                return Err(Error::Msg(format!("{name} must be greater than zero")));
            }
        }
        if self.d_model % self.num_heads != 0 {
            return Err(Error::Msg(format!(
                "d_model ({}) must be divisible by num_heads ({})",
                self.d_model, self.num_heads
            )));
        }
        if self.output_sizes.is_empty() {
            return Err(Error::Msg("output_sizes must name at least one stream".into()));
        }
        if self.input_vocab_size < MIN_VOCAB_SIZE {
            return Err(Error::Msg(format!(
                "input_vocab_size must be at least {MIN_VOCAB_SIZE}, got {}",
                self.input_vocab_size
            )));
        }
        if let Some(stream) = self
            .output_sizes
            .iter()
            .position(|&size| size < MIN_VOCAB_SIZE)
        {
            return Err(Error::Msg(format!(
                "output_sizes[{stream}] must be at least {MIN_VOCAB_SIZE}, got {}",
                self.output_sizes[stream]
            )));
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return Err(Error::Msg(format!(
                "dropout_rate must be in [0, 1), got {}",
                self.dropout_rate
            )));
        }
        Ok(())
    }
}
