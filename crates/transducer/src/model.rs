//! Top-level transformer: encoder, decoder and one softmax head per stream.

use attention::masks::build_padding_mask;
use candle_core::{bail, DType, Device, Result, Tensor, Var, D};
use candle_nn::ops::softmax;
use layers::{
    dropout::ForwardMode,
    linear::{Linear, LinearConfig},
    params::{scoped, Parameterized},
};

use crate::{
    config::TransformerConfig,
    decoder::{AttentionMaps, Decoder},
    encoder::Encoder,
};

/// Token id reserved for the start of every decoder input.
pub const START_TOKEN_ID: u32 = 1;

/// Batch size used by [`Transformer::warm_up`].
const WARM_UP_BATCH: usize = 2;

/// Result of a full forward pass.
#[derive(Debug, Clone)]
pub struct TransformerOutput {
    /// One `(batch, target_len, vocab_i)` probability tensor per stream.
    pub probs: Vec<Tensor>,
    pub attention: AttentionMaps,
}

#[derive(Debug)]
pub struct Transformer {
    config: TransformerConfig,
    device: Device,
    encoder: Encoder,
    decoder: Decoder,
    heads: Vec<Linear>,
}

impl Transformer {
    /// Validates `config` and allocates every parameter on `device`.
    pub fn new(config: TransformerConfig, device: &Device) -> Result<Self> {
        config.validate()?;
        let encoder = Encoder::new(&config, device)?;
        let decoder = Decoder::new(&config, device)?;
        let heads = config
            .output_sizes
            .iter()
            .map(|&vocab| Linear::xavier_uniform(LinearConfig::new(config.d_model, vocab), device))
            .collect::<Result<Vec<_>>>()?;

        let model = Self {
            config,
            device: device.clone(),
            encoder,
            decoder,
            heads,
        };
        log::info!(
            "transformer ready: layers={} d_model={} heads={} streams={:?} parameters={}",
            model.config.num_layers,
            model.config.d_model,
            model.config.num_heads,
            model.config.output_sizes,
            model.parameter_count()
        );
        Ok(model)
    }

    pub fn config(&self) -> &TransformerConfig {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn output_sizes(&self) -> &[usize] {
        &self.config.output_sizes
    }

    pub fn num_streams(&self) -> usize {
        self.heads.len()
    }

    /// Encodes `x`, decodes `ys` against the memory and applies every
    /// stream's projection and softmax.
    ///
    /// `target_padding_mask` pads decoder keys (merged with the causal mask);
    /// `padding_mask` pads source keys in both the encoder and the
    /// cross-attention.
    pub fn forward(
        &self,
        x: &Tensor,
        ys: &[Tensor],
        mode: ForwardMode,
        target_padding_mask: Option<&Tensor>,
        padding_mask: Option<&Tensor>,
    ) -> Result<TransformerOutput> {
        let memory = self.encoder.forward(x, mode, padding_mask)?;
        let (hidden, attention) =
            self.decoder
                .forward(ys, &memory, mode, target_padding_mask, padding_mask)?;
        let probs = self
            .heads
            .iter()
            .map(|head| softmax(&head.forward(&hidden)?, D::Minus1))
            .collect::<Result<Vec<_>>>()?;
        Ok(TransformerOutput { probs, attention })
    }

    /// Teacher-forcing input: prepends [`START_TOKEN_ID`] to every row of a
    /// `(batch, seq)` id tensor and drops the last column.
    pub fn shift_right(y: &Tensor) -> Result<Tensor> {
        let (batch, seq) = y.dims2()?;
        if seq == 0 {
            bail!("cannot shift an empty target sequence");
        }
        let start = Tensor::full(START_TOKEN_ID, (batch, 1), y.device())?.to_dtype(y.dtype())?;
        if seq == 1 {
            return Ok(start);
        }
        Tensor::cat(&[&start, &y.narrow(1, 0, seq - 1)?], 1)
    }

    /// Greedy autoregressive prediction from source ids alone.
    ///
    /// Output streams are aligned with the source, so `T` equals the source
    /// length and the decoder's padding mask comes from `x`. Step `i` runs
    /// one full forward pass whose decoder input holds the start token
    /// followed by the arg-max of steps `0..i` and zeros beyond; its
    /// distribution at position `i` is written into the result. Returns one
    /// `(batch, T, vocab_i)` tensor per stream.
    pub fn predict_probs(&self, x: &Tensor) -> Result<Vec<Tensor>> {
        let (batch, steps) = x.dims2()?;
        let padding_mask = build_padding_mask(x)?;
        let streams = self.num_streams();

        let mut tokens: Vec<Vec<u32>> = (0..streams)
            .map(|_| {
                let mut buffer = vec![0u32; batch * steps];
                for row in 0..batch {
                    buffer[row * steps] = START_TOKEN_ID;
                }
                buffer
            })
            .collect();
        let mut probs: Vec<Vec<f32>> = self
            .output_sizes()
            .iter()
            .map(|&vocab| vec![0f32; batch * steps * vocab])
            .collect();

        for step in 0..steps {
            let ys = tokens
                .iter()
                .map(|buffer| Tensor::from_slice(buffer, (batch, steps), &self.device))
                .collect::<Result<Vec<_>>>()?;
            let output = self.forward(
                x,
                &ys,
                ForwardMode::Inference,
                Some(&padding_mask),
                Some(&padding_mask),
            )?;

            for (stream, stream_probs) in output.probs.iter().enumerate() {
                let vocab = self.config.output_sizes[stream];
                let rows = stream_probs
                    .narrow(1, step, 1)?
                    .squeeze(1)?
                    .to_dtype(DType::F32)?
                    .to_vec2::<f32>()?;
                for (row, dist) in rows.iter().enumerate() {
                    let offset = (row * steps + step) * vocab;
                    probs[stream][offset..offset + vocab].copy_from_slice(dist);
                    if step + 1 < steps {
                        tokens[stream][row * steps + step + 1] = argmax(dist);
                    }
                }
            }
            log::debug!("decoded step {}/{}", step + 1, steps);
        }

        probs
            .into_iter()
            .zip(self.output_sizes())
            .map(|(buffer, &vocab)| Tensor::from_vec(buffer, (batch, steps, vocab), &self.device))
            .collect()
    }

    /// Greedy decode: arg-max of [`Self::predict_probs`], one `(batch, T)`
    /// `u32` tensor per stream.
    pub fn predict_argmax(&self, x: &Tensor) -> Result<Vec<Tensor>> {
        self.predict_probs(x)?
            .iter()
            .map(|probs| probs.argmax(D::Minus1))
            .collect()
    }

    /// Runs one inference pass over an all-ones batch to check that the
    /// configured lengths fit, returning the parameter count.
    pub fn warm_up(&self, input_len: usize, output_len: usize) -> Result<usize> {
        let x = Tensor::ones((WARM_UP_BATCH, input_len), DType::U32, &self.device)?;
        let ys = (0..self.num_streams())
            .map(|_| Tensor::ones((WARM_UP_BATCH, output_len), DType::U32, &self.device))
            .collect::<Result<Vec<_>>>()?;
        let output = self.forward(&x, &ys, ForwardMode::Inference, None, None)?;
        for (stream, probs) in output.probs.iter().enumerate() {
            let expected = [WARM_UP_BATCH, output_len, self.config.output_sizes[stream]];
            if probs.dims() != expected {
                bail!(
                    "stream {stream} produced {:?}, expected {expected:?}",
                    probs.dims()
                );
            }
        }
        let count = self.parameter_count();
        log::info!("warm-up pass ok: input_len={input_len} output_len={output_len} parameters={count}");
        Ok(count)
    }
}

impl Parameterized for Transformer {
    fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let mut params = self.encoder.named_parameters(&scoped(scope, "encoder"));
        params.extend(self.decoder.named_parameters(&scoped(scope, "decoder")));
        for (stream, head) in self.heads.iter().enumerate() {
            params.extend(head.named_parameters(&scoped(scope, &format!("heads.{stream}"))));
        }
        params
    }
}

/// Index of the first maximum.
fn argmax(row: &[f32]) -> u32 {
    let mut best = 0usize;
    for (index, value) in row.iter().enumerate() {
        if *value > row[best] {
            best = index;
        }
    }
    best as u32
}
