use crate::common::*;

/// Gamma (shape, rate) sentinel flagging a fixed effect.
///
/// Not a distribution: infinite precision with zero rate means "shared
/// across units, never drawn from the population".
pub const FIXED_EFFECT: (f64, f64) = (f64::INFINITY, 0.0);

/// A parameter is a fixed effect iff `a == +inf` and `b == 0`, exactly
pub fn is_fixed(a: f64, b: f64) -> bool {
    a == f64::INFINITY && b == 0.0
}

/// Elementwise [`is_fixed`] over shape and rate vectors
pub fn fixed_mask(a: &DVec, b: &DVec) -> anyhow::Result<Vec<bool>> {
    anyhow::ensure!(
        a.len() == b.len(),
        "shape ({}) and rate ({}) lengths differ",
        a.len(),
        b.len()
    );
    Ok(a.iter().zip(b.iter()).map(|(&a, &b)| is_fixed(a, b)).collect())
}
