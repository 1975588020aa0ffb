//! Decoder layers and stack, plus the table of attention weights they emit.

use std::fmt;

use candle_core::{bail, Device, Result, Tensor, Var};
use embedding::{SinusoidalEncoding, TokenEmbedding, TokenEmbeddingConfig};
use layers::{
    dropout::{Dropout, ForwardMode},
    mlp::FeedForward,
    norm::LayerNorm,
    params::{scoped, Parameterized},
};

use crate::{
    config::TransformerConfig,
    encoder::{build_ffn, build_norm, embed_positions},
    mha::MultiHeadAttention,
};

/// Which attention block of a decoder layer produced a weight tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttentionBlock {
    /// Causal self-attention over the target.
    SelfAttention,
    /// Attention from the target into encoder memory.
    CrossAttention,
}

impl AttentionBlock {
    fn ordinal(self) -> usize {
        match self {
            AttentionBlock::SelfAttention => 1,
            AttentionBlock::CrossAttention => 2,
        }
    }
}

/// Weights `(batch, num_heads, q_len, k_len)` from one block of one layer.
#[derive(Debug, Clone)]
pub struct AttentionMap {
    pub layer: usize,
    pub block: AttentionBlock,
    pub weights: Tensor,
}

impl AttentionMap {
    /// Stable label such as `decoder_layer1_block2` (layers count from one).
    pub fn label(&self) -> String {
        format!("decoder_layer{}_block{}", self.layer + 1, self.block.ordinal())
    }
}

/// Ordered per-layer attention weights: layer order, self before cross.
#[derive(Debug, Clone, Default)]
pub struct AttentionMaps {
    entries: Vec<AttentionMap>,
}

impl AttentionMaps {
    pub fn with_capacity(layers: usize) -> Self {
        Self {
            entries: Vec::with_capacity(layers * 2),
        }
    }

    pub(crate) fn push(&mut self, layer: usize, block: AttentionBlock, weights: Tensor) {
        self.entries.push(AttentionMap {
            layer,
            block,
            weights,
        });
    }

    pub fn get(&self, layer: usize, block: AttentionBlock) -> Option<&Tensor> {
        self.entries
            .iter()
            .find(|entry| entry.layer == layer && entry.block == block)
            .map(|entry| &entry.weights)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttentionMap> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Output of a single decoder layer.
#[derive(Debug, Clone)]
pub struct DecoderLayerOutput {
    pub hidden: Tensor,
    pub self_weights: Tensor,
    pub cross_weights: Tensor,
}

/// Post-norm decoder layer: causal self-attention, cross-attention into the
/// encoder memory, then feed-forward.
#[derive(Debug)]
pub struct DecoderLayer {
    self_attention: MultiHeadAttention,
    cross_attention: MultiHeadAttention,
    ffn: FeedForward,
    norm1: LayerNorm,
    norm2: LayerNorm,
    norm3: LayerNorm,
    dropout1: Dropout,
    dropout2: Dropout,
    dropout3: Dropout,
}

impl DecoderLayer {
    pub fn new(config: &TransformerConfig, device: &Device) -> Result<Self> {
        Ok(Self {
            self_attention: MultiHeadAttention::new(config.d_model, config.num_heads, true, device)?,
            cross_attention: MultiHeadAttention::new(config.d_model, config.num_heads, false, device)?,
            ffn: build_ffn(config, device)?,
            norm1: build_norm(config, device)?,
            norm2: build_norm(config, device)?,
            norm3: build_norm(config, device)?,
            dropout1: Dropout::new(config.dropout_rate)?,
            dropout2: Dropout::new(config.dropout_rate)?,
            dropout3: Dropout::new(config.dropout_rate)?,
        })
    }

    /// `target_mask` pads the target keys and is merged with the causal
    /// mask inside self-attention; `memory_mask` pads the source keys.
    pub fn forward(
        &self,
        x: &Tensor,
        memory: &Tensor,
        mode: ForwardMode,
        target_mask: Option<&Tensor>,
        memory_mask: Option<&Tensor>,
    ) -> Result<DecoderLayerOutput> {
        let (attended, self_weights) = self.self_attention.forward(x, x, x, target_mask)?;
        let attended = self.dropout1.forward(&attended, mode)?;
        let out1 = self.norm1.forward(&(x + attended)?)?;

        let (attended, cross_weights) =
            self.cross_attention
                .forward(memory, memory, &out1, memory_mask)?;
        let attended = self.dropout2.forward(&attended, mode)?;
        let out2 = self.norm2.forward(&(out1 + attended)?)?;

        let ffn_out = self.ffn.forward(&out2)?;
        let ffn_out = self.dropout3.forward(&ffn_out, mode)?;
        let hidden = self.norm3.forward(&(out2 + ffn_out)?)?;

        Ok(DecoderLayerOutput {
            hidden,
            self_weights,
            cross_weights,
        })
    }
}

impl Parameterized for DecoderLayer {
    fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let mut params = self
            .self_attention
            .named_parameters(&scoped(scope, "self_attention"));
        params.extend(
            self.cross_attention
                .named_parameters(&scoped(scope, "cross_attention")),
        );
        params.extend(self.ffn.named_parameters(&scoped(scope, "ffn")));
        params.extend(self.norm1.named_parameters(&scoped(scope, "norm1")));
        params.extend(self.norm2.named_parameters(&scoped(scope, "norm2")));
        params.extend(self.norm3.named_parameters(&scoped(scope, "norm3")));
        params
    }
}

/// One embedding table per output stream, summed, followed by
/// `num_layers` decoder layers.
pub struct Decoder {
    d_model: usize,
    embeddings: Vec<TokenEmbedding>,
    positional: SinusoidalEncoding,
    dropout: Dropout,
    layers: Vec<DecoderLayer>,
}

impl fmt::Debug for Decoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Decoder")
            .field("d_model", &self.d_model)
            .field("streams", &self.embeddings.len())
            .field("layers", &self.layers.len())
            .finish()
    }
}

impl Decoder {
    pub fn new(config: &TransformerConfig, device: &Device) -> Result<Self> {
        let embeddings = config
            .output_sizes
            .iter()
            .map(|&vocab_size| {
                TokenEmbedding::new(TokenEmbeddingConfig {
                    vocab_size,
                    hidden_dim: config.d_model,
                    device: device.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let positional =
            SinusoidalEncoding::new(config.max_position_target, config.d_model, device)?;
        let layers = (0..config.num_layers)
            .map(|_| DecoderLayer::new(config, device))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            d_model: config.d_model,
            embeddings,
            positional,
            dropout: Dropout::new(config.dropout_rate)?,
            layers,
        })
    }

    pub fn num_streams(&self) -> usize {
        self.embeddings.len()
    }

    /// Decodes one `(batch, seq)` id tensor per stream against `memory`.
    ///
    /// Returns the final hidden state `(batch, seq, d_model)` and the
    /// attention weights of every layer.
    pub fn forward(
        &self,
        ys: &[Tensor],
        memory: &Tensor,
        mode: ForwardMode,
        target_mask: Option<&Tensor>,
        memory_mask: Option<&Tensor>,
    ) -> Result<(Tensor, AttentionMaps)> {
        if ys.len() != self.embeddings.len() {
            bail!(
                "decoder expects {} target streams, got {}",
                self.embeddings.len(),
                ys.len()
            );
        }

        let mut summed: Option<Tensor> = None;
        for (embedding, y) in self.embeddings.iter().zip(ys) {
            let embedded = embedding.forward(y)?;
            summed = Some(match summed {
                Some(acc) => (acc + embedded)?,
                None => embedded,
            });
        }
        let Some(summed) = summed else {
            bail!("decoder requires at least one target stream");
        };

        let mut hidden = embed_positions(&summed, self.d_model, &self.positional, &self.dropout, mode)?;
        let mut maps = AttentionMaps::with_capacity(self.layers.len());
        for (index, layer) in self.layers.iter().enumerate() {
            let output = layer.forward(&hidden, memory, mode, target_mask, memory_mask)?;
            maps.push(index, AttentionBlock::SelfAttention, output.self_weights);
            maps.push(index, AttentionBlock::CrossAttention, output.cross_weights);
            hidden = output.hidden;
        }
        Ok((hidden, maps))
    }
}

impl Parameterized for Decoder {
    fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let mut params = Vec::new();
        for (stream, embedding) in self.embeddings.iter().enumerate() {
            params.extend(embedding.named_parameters(&scoped(scope, &format!("embeddings.{stream}"))));
        }
        for (index, layer) in self.layers.iter().enumerate() {
            params.extend(layer.named_parameters(&scoped(scope, &format!("layers.{index}"))));
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;

    fn config() -> TransformerConfig {
        TransformerConfig {
            num_layers: 2,
            d_model: 8,
            num_heads: 2,
            dff: 16,
            input_vocab_size: 10,
            output_sizes: vec![5, 4],
            max_position_input: 8,
            max_position_target: 8,
            dropout_rate: 0.0,
        }
    }

    #[test]
    fn collects_two_maps_per_layer() -> Result<()> {
        let device = Device::Cpu;
        let decoder = Decoder::new(&config(), &device)?;
        let memory = Tensor::randn(0f32, 1.0, (2, 5, 8), &device)?;
        let ys = vec![
            Tensor::from_slice(&[1u32, 2, 3, 1, 4, 0], (2, 3), &device)?,
            Tensor::from_slice(&[1u32, 3, 3, 1, 2, 0], (2, 3), &device)?,
        ];
        let (hidden, maps) = decoder.forward(&ys, &memory, ForwardMode::Inference, None, None)?;

        assert_eq!(hidden.dims(), &[2, 3, 8]);
        assert_eq!(maps.len(), 4);
        let labels: Vec<String> = maps.iter().map(AttentionMap::label).collect();
        assert_eq!(
            labels,
            [
                "decoder_layer1_block1",
                "decoder_layer1_block2",
                "decoder_layer2_block1",
                "decoder_layer2_block2"
            ]
        );
        let cross = maps
            .get(1, AttentionBlock::CrossAttention)
            .ok_or_else(|| candle_core::Error::Msg("missing cross map".into()))?;
        assert_eq!(cross.dims(), &[2, 2, 3, 5]);
        let own = maps
            .get(0, AttentionBlock::SelfAttention)
            .ok_or_else(|| candle_core::Error::Msg("missing self map".into()))?;
        assert_eq!(own.dims(), &[2, 2, 3, 3]);
        assert!(maps.get(2, AttentionBlock::SelfAttention).is_none());
        Ok(())
    }

    #[test]
    fn rejects_wrong_stream_count() -> Result<()> {
        let device = Device::Cpu;
        let decoder = Decoder::new(&config(), &device)?;
        let memory = Tensor::zeros((1, 2, 8), DType::F32, &device)?;
        let y = Tensor::ones((1, 2), DType::U32, &device)?;
        assert!(decoder
            .forward(&[y], &memory, ForwardMode::Inference, None, None)
            .is_err());
        Ok(())
    }

    #[test]
    fn one_embedding_table_per_stream() -> Result<()> {
        let decoder = Decoder::new(&config(), &Device::Cpu)?;
        assert_eq!(decoder.num_streams(), 2);
        let params = decoder.named_parameters("decoder");
        assert_eq!(params[0].0, "decoder.embeddings.0.weight");
        assert_eq!(params[1].0, "decoder.embeddings.1.weight");
        assert_eq!(params[1].1.as_tensor().dims(), &[4, 8]);
        Ok(())
    }
}
