//! Configuration options shared by all attention implementations.

/// Additive penalty subtracted from scores at masked positions.
///
/// Large enough that `exp(score - penalty)` underflows to zero next to any
/// unmasked score, small enough to stay finite in reduced precision.
pub const DEFAULT_MASK_PENALTY: f64 = 1e9;

/// Configuration driving attention behaviour.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Merge a look-ahead mask so each query only sees itself and earlier keys.
    pub causal: bool,
    /// Penalty applied wherever the combined mask is `1.0`.
    pub mask_penalty: f64,
}

impl Config {
    pub fn causal() -> Self {
        Self {
            causal: true,
            ..Self::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            causal: false,
            mask_penalty: DEFAULT_MASK_PENALTY,
        }
    }
}
