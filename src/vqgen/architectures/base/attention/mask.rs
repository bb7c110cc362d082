//! Attention mask construction.
//!
//! Masks are `[query_len, key_len]` bool tensors where `true` means the query
//! may NOT attend to that key. They are always rebuilt from the lengths of the
//! current call so a short final batch never sees a mask sized for a longer one.

use burn::tensor::{backend::Backend, Bool, Int, Tensor};

use crate::tensor_io::bool_values;
use crate::vqgen::error::{ModelError, Result};

/// Which keys a query position may see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaskPolicy {
    /// Every query attends to every key.
    FullVisibility,
    /// Query `i` attends to keys `0..=i` only.
    #[default]
    Causal,
}

impl MaskPolicy {
    /// Build the mask for this policy from the current call's lengths.
    pub fn build<B: Backend>(
        self,
        query_len: usize,
        key_len: usize,
        device: &B::Device,
    ) -> Tensor<B, 2, Bool> {
        match self {
            MaskPolicy::FullVisibility => full_visibility_mask(query_len, key_len, device),
            MaskPolicy::Causal => causal_mask(query_len, key_len, device),
        }
    }
}

/// All-false mask: nothing is hidden.
pub fn full_visibility_mask<B: Backend>(
    query_len: usize,
    key_len: usize,
    device: &B::Device,
) -> Tensor<B, 2, Bool> {
    Tensor::<B, 2, Int>::zeros([query_len, key_len], device).bool()
}

/// Strict upper-triangular mask: `true` exactly where `key > query`.
pub fn causal_mask<B: Backend>(
    query_len: usize,
    key_len: usize,
    device: &B::Device,
) -> Tensor<B, 2, Bool> {
    let rows = Tensor::<B, 1, Int>::arange(0..query_len as i64, device)
        .reshape([query_len, 1])
        .expand([query_len, key_len]);
    let cols = Tensor::<B, 1, Int>::arange(0..key_len as i64, device)
        .reshape([1, key_len])
        .expand([query_len, key_len]);

    cols.greater(rows)
}

/// Check that a mask matches the attention lengths and leaves every query row
/// at least one visible key. A fully hidden row would turn softmax into NaN.
pub fn validate_mask<B: Backend>(
    mask: &Tensor<B, 2, Bool>,
    query_len: usize,
    key_len: usize,
) -> Result<()> {
    let dims = mask.dims();
    if dims != [query_len, key_len] {
        return Err(ModelError::shape("attention mask", [query_len, key_len], dims));
    }

    let values = bool_values(mask)?;
    for (row, chunk) in values.chunks(key_len.max(1)).enumerate() {
        if chunk.iter().all(|&hidden| hidden) {
            return Err(ModelError::InvariantViolation(format!(
                "attention mask hides every key for query position {}",
                row
            )));
        }
    }

    Ok(())
}
