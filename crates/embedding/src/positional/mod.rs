//! Positional encodings.

pub mod sinusoidal;
