//! Encoder layers and stack.

use candle_core::{Device, Result, Tensor, Var};
use embedding::{SinusoidalEncoding, TokenEmbedding, TokenEmbeddingConfig};
use layers::{
    dropout::{Dropout, ForwardMode},
    mlp::{FeedForward, FeedForwardConfig},
    norm::{LayerNorm, NormConfig},
    params::{scoped, Parameterized},
};

use crate::{config::TransformerConfig, mha::MultiHeadAttention};

pub(crate) fn build_ffn(config: &TransformerConfig, device: &Device) -> Result<FeedForward> {
    FeedForward::new(FeedForwardConfig::new(config.d_model, config.dff), device)
}

pub(crate) fn build_norm(config: &TransformerConfig, device: &Device) -> Result<LayerNorm> {
    LayerNorm::new(NormConfig::new(config.d_model), device)
}

/// Scales token embeddings by `sqrt(d_model)`, adds positions and applies
/// dropout. Shared by both stacks.
pub(crate) fn embed_positions(
    embedded: &Tensor,
    d_model: usize,
    positional: &SinusoidalEncoding,
    dropout: &Dropout,
    mode: ForwardMode,
) -> Result<Tensor> {
    let scaled = (embedded * (d_model as f64).sqrt())?;
    let positioned = positional.apply(&scaled)?;
    dropout.forward(&positioned, mode)
}

/// Post-norm encoder layer: self-attention then feed-forward, each followed
/// by dropout, a residual add and layer normalisation.
#[derive(Debug)]
pub struct EncoderLayer {
    self_attention: MultiHeadAttention,
    ffn: FeedForward,
    norm1: LayerNorm,
    norm2: LayerNorm,
    dropout1: Dropout,
    dropout2: Dropout,
}

impl EncoderLayer {
    pub fn new(config: &TransformerConfig, device: &Device) -> Result<Self> {
        Ok(Self {
            self_attention: MultiHeadAttention::new(config.d_model, config.num_heads, false, device)?,
            ffn: build_ffn(config, device)?,
            norm1: build_norm(config, device)?,
            norm2: build_norm(config, device)?,
            dropout1: Dropout::new(config.dropout_rate)?,
            dropout2: Dropout::new(config.dropout_rate)?,
        })
    }

    /// `mask` is the source padding mask, `(batch, 1, 1, seq)`.
    pub fn forward(&self, x: &Tensor, mask: Option<&Tensor>, mode: ForwardMode) -> Result<Tensor> {
        let (attended, _) = self.self_attention.forward(x, x, x, mask)?;
        let attended = self.dropout1.forward(&attended, mode)?;
        let out1 = self.norm1.forward(&(x + attended)?)?;

        let ffn_out = self.ffn.forward(&out1)?;
        let ffn_out = self.dropout2.forward(&ffn_out, mode)?;
        self.norm2.forward(&(out1 + ffn_out)?)
    }
}

impl Parameterized for EncoderLayer {
    fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let mut params = self
            .self_attention
            .named_parameters(&scoped(scope, "self_attention"));
        params.extend(self.ffn.named_parameters(&scoped(scope, "ffn")));
        params.extend(self.norm1.named_parameters(&scoped(scope, "norm1")));
        params.extend(self.norm2.named_parameters(&scoped(scope, "norm2")));
        params
    }
}

/// Token embedding, positional encoding and `num_layers` encoder layers.
#[derive(Debug)]
pub struct Encoder {
    d_model: usize,
    embedding: TokenEmbedding,
    positional: SinusoidalEncoding,
    dropout: Dropout,
    layers: Vec<EncoderLayer>,
}

impl Encoder {
    pub fn new(config: &TransformerConfig, device: &Device) -> Result<Self> {
        let embedding = TokenEmbedding::new(TokenEmbeddingConfig {
            vocab_size: config.input_vocab_size,
            hidden_dim: config.d_model,
            device: device.clone(),
        })?;
        let positional = SinusoidalEncoding::new(config.max_position_input, config.d_model, device)?;
        let layers = (0..config.num_layers)
            .map(|_| EncoderLayer::new(config, device))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            d_model: config.d_model,
            embedding,
            positional,
            dropout: Dropout::new(config.dropout_rate)?,
            layers,
        })
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Encodes `(batch, seq)` source ids into `(batch, seq, d_model)` memory.
    pub fn forward(&self, x: &Tensor, mode: ForwardMode, mask: Option<&Tensor>) -> Result<Tensor> {
        let embedded = self.embedding.forward(x)?;
        let mut hidden = embed_positions(&embedded, self.d_model, &self.positional, &self.dropout, mode)?;
        for layer in &self.layers {
            hidden = layer.forward(&hidden, mask, mode)?;
        }
        Ok(hidden)
    }
}

impl Parameterized for Encoder {
    fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let mut params = self.embedding.named_parameters(&scoped(scope, "embedding"));
        for (index, layer) in self.layers.iter().enumerate() {
            params.extend(layer.named_parameters(&scoped(scope, &format!("layers.{index}"))));
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attention::masks::build_padding_mask;

    fn config() -> TransformerConfig {
        TransformerConfig {
            num_layers: 2,
            d_model: 8,
            num_heads: 2,
            dff: 16,
            input_vocab_size: 10,
            output_sizes: vec![5],
            max_position_input: 6,
            max_position_target: 6,
            dropout_rate: 0.0,
        }
    }

    #[test]
    fn encodes_to_model_width() -> Result<()> {
        let device = Device::Cpu;
        let encoder = Encoder::new(&config(), &device)?;
        let x = Tensor::from_slice(&[3u32, 4, 5, 0, 7, 8, 0, 0], (2, 4), &device)?;
        let mask = build_padding_mask(&x)?;
        let memory = encoder.forward(&x, ForwardMode::Inference, Some(&mask))?;
        assert_eq!(memory.dims(), &[2, 4, 8]);
        assert_eq!(encoder.num_layers(), 2);
        Ok(())
    }

    #[test]
    fn rejects_sequences_past_max_position() -> Result<()> {
        let device = Device::Cpu;
        let encoder = Encoder::new(&config(), &device)?;
        let x = Tensor::ones((1, 7), candle_core::DType::U32, &device)?;
        assert!(encoder.forward(&x, ForwardMode::Inference, None).is_err());
        Ok(())
    }

    #[test]
    fn layer_names_are_scoped() -> Result<()> {
        let encoder = Encoder::new(&config(), &Device::Cpu)?;
        let names: Vec<String> = encoder
            .named_parameters("encoder")
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert!(names.contains(&"encoder.embedding.weight".to_string()));
        assert!(names.contains(&"encoder.layers.1.self_attention.wq.weight".to_string()));
        assert!(names.contains(&"encoder.layers.0.norm2.gamma".to_string()));
        Ok(())
    }
}
