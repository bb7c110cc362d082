//! A single attention head with its own bias-free key/query/value projections.

use burn::module::Module;
use burn::prelude::*;

use super::{check_qkv_shapes, mask::validate_mask, scaled_dot_product, Attention};
use crate::vqgen::architectures::base::transformer::{DeterministicLinear, DeterministicRngContext};
use crate::vqgen::error::{ModelError, Result};

#[derive(Module, Debug)]
pub struct AttentionHead<B: Backend> {
    key: DeterministicLinear<B>,
    query: DeterministicLinear<B>,
    value: DeterministicLinear<B>,
    embed_dim: usize,
    head_size: usize,
}

impl<B: Backend> AttentionHead<B> {
    /// Projections are seeded at `seed_offset + {0, 1, 2}` for key, query, value.
    pub fn new(
        embed_dim: usize,
        head_size: usize,
        rng_ctx: &DeterministicRngContext<B>,
        seed_offset: u64,
    ) -> Result<Self> {
        if embed_dim == 0 || head_size == 0 {
            return Err(ModelError::config(format!(
                "attention head needs non-zero dimensions, got embed_dim={} head_size={}",
                embed_dim, head_size
            )));
        }

        let seed = rng_ctx.seed.wrapping_add(seed_offset);
        Ok(Self {
            key: rng_ctx.create_deterministic_linear(embed_dim, head_size, false, seed),
            query: rng_ctx.create_deterministic_linear(embed_dim, head_size, false, seed.wrapping_add(1)),
            value: rng_ctx.create_deterministic_linear(embed_dim, head_size, false, seed.wrapping_add(2)),
            embed_dim,
            head_size,
        })
    }

    pub fn head_size(&self) -> usize {
        self.head_size
    }

    /// Argument order is key, query, value.
    pub fn forward(
        &self,
        key_input: Tensor<B, 3>,
        query_input: Tensor<B, 3>,
        value_input: Tensor<B, 3>,
        mask: Tensor<B, 2, Bool>,
    ) -> Result<Tensor<B, 3>> {
        self.forward_with_weights(key_input, query_input, value_input, mask)
            .map(|(output, _)| output)
    }

    /// Same as [`AttentionHead::forward`], also returning the
    /// `[batch, query_len, key_len]` attention probabilities.
    pub fn forward_with_weights(
        &self,
        key_input: Tensor<B, 3>,
        query_input: Tensor<B, 3>,
        value_input: Tensor<B, 3>,
        mask: Tensor<B, 2, Bool>,
    ) -> Result<(Tensor<B, 3>, Tensor<B, 3>)> {
        let (_, query_len, key_len) = check_qkv_shapes(
            query_input.dims(),
            key_input.dims(),
            value_input.dims(),
            self.embed_dim,
        )?;
        validate_mask(&mask, query_len, key_len)?;

        let k = self.key.forward_3d(key_input);
        let q = self.query.forward_3d(query_input);
        let v = self.value.forward_3d(value_input);

        Ok(scaled_dot_product(q, k, v, mask, self.head_size, None))
    }
}

impl<B: Backend> Attention<B> for AttentionHead<B> {
    fn output_dim(&self) -> usize {
        self.head_size
    }

    fn attend(
        &self,
        query: Tensor<B, 3>,
        key: Tensor<B, 3>,
        value: Tensor<B, 3>,
        mask: Tensor<B, 2, Bool>,
    ) -> Result<Tensor<B, 3>> {
        self.forward(key, query, value, mask)
    }
}
