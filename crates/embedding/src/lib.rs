//! Embedding crate
//!
//! The token module holds learnable lookup tables; the positional module
//! exposes the fixed sinusoidal encoder added on top of them.

pub mod positional;
pub mod token;

pub use positional::sinusoidal::SinusoidalEncoding;
pub use token::{TokenEmbedding, TokenEmbeddingConfig};
