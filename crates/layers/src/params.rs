//! Explicit parameter registration.
//!
//! Components expose their learned weights through [`Parameterized`] instead
//! of relying on implicit registration. Composite modules call their
//! children with a dot-separated scope so that the flattened list handed to
//! the optimizer carries stable, unique names.

use candle_core::Var;

/// Implemented by every component that owns trainable weights.
pub trait Parameterized {
    /// Returns `(name, variable)` pairs, with names prefixed by `scope`.
    fn named_parameters(&self, scope: &str) -> Vec<(String, Var)>;

    /// Flattened parameter list without names.
    fn parameters(&self) -> Vec<Var> {
        self.named_parameters("")
            .into_iter()
            .map(|(_, var)| var)
            .collect()
    }

    /// Total number of scalar weights.
    fn parameter_count(&self) -> usize {
        self.parameters()
            .iter()
            .map(|var| var.as_tensor().elem_count())
            .sum()
    }
}

/// Joins a parent scope and a child name, skipping empty scopes.
pub fn scoped(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{scope}.{name}")
    }
}
