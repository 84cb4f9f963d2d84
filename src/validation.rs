//! Numerical guards for loss terms.
//!
//! Training failure from a NaN loss is much cheaper to diagnose at the term
//! that produced it than three optimizer steps later, so the aggregator runs
//! every term through [`validate_loss_term`] before returning it.

use burn::tensor::{backend::Backend, Tensor};

/// Loss magnitude above which a warning is logged; values this large usually
/// mean a missing normalization or a diverging run.
const SUSPICIOUS_MAGNITUDE: f32 = 1e4;

/// Validate one scalar loss term.
///
/// # Panics
///
/// Panics when the value is NaN or infinite, naming the offending term.
/// Finite but suspiciously large values only log a warning; negative values
/// log a warning too, since every term in this objective is non-negative up
/// to float error.
pub fn validate_loss_term<B: Backend>(term: &Tensor<B, 1>, name: &str) {
    let data = term.to_data();
    let Ok(slice) = data.as_slice::<f32>() else {
        return; // non-f32 backend element type, skip host-side checks
    };
    let value = slice[0];

    if value.is_nan() {
        panic!(
            "NUMERICAL ERROR: loss term '{}' is NaN. This indicates numerical instability \
             in the inputs or a division by zero upstream.",
            name
        );
    }
    if value.is_infinite() {
        panic!(
            "NUMERICAL ERROR: loss term '{}' is infinite ({}). This indicates overflow, \
             typically from exploding flow magnitudes or degenerate log-variances.",
            name, value
        );
    }
    if value > SUSPICIOUS_MAGNITUDE {
        log::warn!(
            "loss term '{}' is very large ({:.4e}); check input scaling and term weights",
            name,
            value
        );
    }
    if value < -1e-4 {
        log::warn!(
            "loss term '{}' is negative ({:.6}); every term here should be non-negative",
            name,
            value
        );
    }
}
