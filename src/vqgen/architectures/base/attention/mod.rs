//! Scaled dot-product attention: the shared kernel, the single head and the
//! multi-head layer used by every transformer block.

use burn::nn::Dropout;
use burn::prelude::*;
use burn::tensor::activation;

use crate::vqgen::error::{ModelError, Result};

pub mod full_attention;
pub mod head;
pub mod mask;

pub use mask::MaskPolicy;

/// Common surface of the attention layers.
///
/// `mask` is `[query_len, key_len]` with `true` marking hidden keys; it is
/// validated against the actual lengths before any arithmetic happens.
pub trait Attention<B: Backend> {
    /// Width of the feature dimension produced by [`Attention::attend`].
    fn output_dim(&self) -> usize;

    /// Attend `query` over `key`/`value` and return `[batch, query_len, output_dim]`.
    fn attend(
        &self,
        query: Tensor<B, 3>,
        key: Tensor<B, 3>,
        value: Tensor<B, 3>,
        mask: Tensor<B, 2, Bool>,
    ) -> Result<Tensor<B, 3>>;
}

/// Validate the three attention inputs against each other and the expected
/// feature width. Returns `(batch, query_len, key_len)`.
pub(crate) fn check_qkv_shapes(
    query: [usize; 3],
    key: [usize; 3],
    value: [usize; 3],
    embed_dim: usize,
) -> Result<(usize, usize, usize)> {
    let [batch, query_len, query_dim] = query;
    let [key_batch, key_len, key_dim] = key;
    let [value_batch, value_len, value_dim] = value;

    if key_batch != batch || value_batch != batch {
        return Err(ModelError::shape(
            "attention batch size",
            [batch, batch, batch],
            [batch, key_batch, value_batch],
        ));
    }
    if query_dim != embed_dim || key_dim != embed_dim || value_dim != embed_dim {
        return Err(ModelError::shape(
            "attention embedding dimension",
            [embed_dim, embed_dim, embed_dim],
            [query_dim, key_dim, value_dim],
        ));
    }
    if key_len != value_len {
        return Err(ModelError::shape("attention key/value length", key_len, value_len));
    }
    if batch == 0 || query_len == 0 || key_len == 0 {
        return Err(ModelError::shape(
            "attention input (non-empty)",
            "batch, query_len, key_len >= 1",
            [batch, query_len, key_len],
        ));
    }

    Ok((batch, query_len, key_len))
}

/// Masked scaled dot-product attention over the last two dimensions.
///
/// Returns `(output, weights)` where `weights` are the post-softmax,
/// pre-dropout probabilities. `dropout` only touches the probabilities that
/// multiply `value`.
pub(crate) fn scaled_dot_product<B: Backend, const D: usize>(
    query: Tensor<B, D>,
    key: Tensor<B, D>,
    value: Tensor<B, D>,
    mask: Tensor<B, 2, Bool>,
    head_size: usize,
    dropout: Option<&Dropout>,
) -> (Tensor<B, D>, Tensor<B, D>) {
    let scale = (head_size as f64).powf(-0.5);
    let scores = query.matmul(key.swap_dims(D - 2, D - 1)) * scale;

    let mask = mask.unsqueeze::<D>().expand(scores.dims());
    let weights = activation::softmax(scores.mask_fill(mask, f32::NEG_INFINITY), D - 1);

    let attended = match dropout {
        Some(dropout) => dropout.forward(weights.clone()),
        None => weights.clone(),
    };

    (attended.matmul(value), weights)
}
