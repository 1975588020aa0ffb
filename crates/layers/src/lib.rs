//! Building blocks for transformer layers.
//!
//! Every component here owns its learned weights as [`candle_core::Var`]s so
//! that a `loss.backward()` call yields gradients for exactly the parameters
//! registered through [`params::Parameterized`]. Forward passes take an
//! explicit [`dropout::ForwardMode`] wherever behaviour differs between
//! training and inference.

pub mod checks;
pub mod dropout;
pub mod linear;
pub mod mlp;
pub mod norm;
pub mod params;

pub use dropout::{Dropout, ForwardMode};
pub use linear::{Linear, LinearConfig};
pub use mlp::{FeedForward, FeedForwardConfig};
pub use norm::{LayerNorm, NormConfig};
pub use params::Parameterized;
