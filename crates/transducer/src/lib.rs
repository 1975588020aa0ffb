//! Encoder-decoder transformer that transduces one token stream into several
//! aligned output streams.
//!
//! The decoder consumes the sum of one embedding per output stream and
//! projects its hidden state through one softmax head per stream, so every
//! decoding step resolves the same position in all streams at once.

pub mod config;
pub mod decoder;
pub mod encoder;
pub mod mha;
pub mod model;

pub use attention::masks::PAD_TOKEN_ID;
pub use config::TransformerConfig;
pub use decoder::{AttentionBlock, AttentionMap, AttentionMaps, Decoder, DecoderLayer};
pub use encoder::{Encoder, EncoderLayer};
pub use mha::MultiHeadAttention;
pub use model::{Transformer, TransformerOutput, START_TOKEN_ID};
