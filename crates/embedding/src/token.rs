//! Learnable token embedding table.

use candle_core::{bail, DType, Device, Error, Result, Tensor, Var};
use layers::params::{scoped, Parameterized};

/// Half-width of the uniform range used to initialise embedding rows.
const INIT_RANGE: f32 = 0.05;

/// Configuration for building a token embedding table.
#[derive(Debug, Clone)]
pub struct TokenEmbeddingConfig {
    /// Size of the vocabulary (number of distinct tokens).
    pub vocab_size: usize,
    /// Dimensionality of each embedding vector.
    pub hidden_dim: usize,
    /// Device hosting the parameters.
    pub device: Device,
}

/// Learnable `(vocab_size, hidden_dim)` lookup table.
#[derive(Debug, Clone)]
pub struct TokenEmbedding {
    config: TokenEmbeddingConfig,
    weight: Var,
}

impl TokenEmbedding {
    /// Builds a new table with rows sampled uniformly from `[-0.05, 0.05]`.
    pub fn new(config: TokenEmbeddingConfig) -> Result<Self> {
        if config.vocab_size == 0 {
            bail!("token embedding requires vocab_size > 0");
        }
        if config.hidden_dim == 0 {
            bail!("token embedding requires hidden_dim > 0");
        }

        let shape = (config.vocab_size, config.hidden_dim);
        let weight = Var::rand(-INIT_RANGE, INIT_RANGE, shape, &config.device)?;
        Ok(Self { config, weight })
    }

    /// Returns the embedding configuration.
    pub fn config(&self) -> &TokenEmbeddingConfig {
        &self.config
    }

    /// Returns a clone of the underlying weight tensor.
    pub fn weight(&self) -> Tensor {
        self.weight.as_tensor().clone()
    }

    /// Looks up embeddings for the provided token ids.
    ///
    /// Inputs must be shaped `(batch, seq)` with an integer dtype. Outputs
    /// follow the `(batch, seq, hidden)` layout.
    pub fn forward(&self, token_ids: &Tensor) -> Result<Tensor> {
        self.validate_token_ids(token_ids)?;
        let dims = token_ids.dims();

        let ids = token_ids.to_dtype(DType::I64)?;
        let flat = ids.flatten_all()?;
        self.ensure_id_range(&flat)?;

        let gathered = self.weight.as_tensor().index_select(&flat, 0)?;
        let mut output_dims = dims.to_vec();
        output_dims.push(self.config.hidden_dim);
        gathered.reshape(output_dims)
    }

    fn validate_token_ids(&self, token_ids: &Tensor) -> Result<()> {
        match token_ids.dims() {
            [batch, seq] => {
                if *batch == 0 || *seq == 0 {
                    return Err(Error::Msg(
                        "token_ids must have non-zero batch and seq dimensions".into(),
                    ));
                }
            }
            _ => return Err(Error::Msg("token_ids must be shaped [batch, seq]".into())),
        }

        if token_ids.dtype().is_int() {
            Ok(())
        } else {
            Err(Error::Msg(format!(
                "token_ids expected integer dtype but received {:?}",
                token_ids.dtype()
            )))
        }
    }

    fn ensure_id_range(&self, flat_ids: &Tensor) -> Result<()> {
        let min_id = flat_ids.min_all()?.to_scalar::<i64>()?;
        if min_id < 0 {
            return Err(Error::Msg(format!(
                "encountered negative token id {min_id} (minimum)"
            )));
        }

        let max_id = flat_ids.max_all()?.to_scalar::<i64>()?;
        let vocab = self.config.vocab_size as i64;
        if max_id >= vocab {
            return Err(Error::Msg(format!(
                "token id {max_id} exceeds vocab size {vocab}"
            )));
        }
        Ok(())
    }
}

impl Parameterized for TokenEmbedding {
    fn named_parameters(&self, scope: &str) -> Vec<(String, Var)> {
        let prefix = if scope.is_empty() { "embedding" } else { scope };
        vec![(scoped(prefix, "weight"), self.weight.clone())]
    }
}
