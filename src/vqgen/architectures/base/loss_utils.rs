//! Loss computation and the host-side checks that guard it.

use burn::tensor::{activation, backend::Backend, Int, Tensor};

use crate::tensor_io::{float_values, int_values};
use crate::vqgen::error::{ModelError, Result};

/// Mean token-level cross-entropy.
///
/// `logits` is `[n, vocab]`, `targets` is `[n]` with entries in `[0, vocab)`.
/// Computed as `-mean(log_softmax(logits)[i, targets[i]])`; log-softmax keeps
/// the computation stable for large logits.
pub fn cross_entropy_mean<B: Backend>(logits: Tensor<B, 2>, targets: Tensor<B, 1, Int>) -> Tensor<B, 1> {
    let log_probs = activation::log_softmax(logits, 1);
    let picked = log_probs.gather(1, targets.unsqueeze_dim::<2>(1));
    picked.squeeze::<1>(1).neg().mean()
}

/// Read a scalar loss and reject values cross-entropy can never produce.
///
/// Returns the loss as `f32` so callers can log it without another readback.
pub fn validate_loss_value<B: Backend>(loss: &Tensor<B, 1>) -> Result<f32> {
    let values = float_values(loss)?;
    let value = *values.first().ok_or_else(|| {
        ModelError::InvariantViolation("loss tensor is empty".to_string())
    })?;

    if !value.is_finite() {
        return Err(ModelError::InvariantViolation(format!(
            "loss is not finite ({})",
            value
        )));
    }
    if value < 0.0 {
        return Err(ModelError::InvariantViolation(format!(
            "cross-entropy loss is negative ({:.6})",
            value
        )));
    }
    if value > 100.0 {
        log::warn!("very large loss ({:.6})", value);
    }

    Ok(value)
}

/// Report the first index outside `[0, bound)`.
pub fn validate_index_range(values: &[i64], bound: usize, context: &'static str) -> Result<()> {
    match values.iter().find(|&&v| v < 0 || v as u64 >= bound as u64) {
        Some(&index) => Err(ModelError::IndexOutOfRange {
            context,
            index,
            bound,
        }),
        None => Ok(()),
    }
}

/// [`validate_index_range`] for a tensor, reading it back to the host.
pub fn validate_index_tensor<B: Backend, const D: usize>(
    indices: &Tensor<B, D, Int>,
    bound: usize,
    context: &'static str,
) -> Result<()> {
    validate_index_range(&int_values(indices)?, bound, context)
}
