use burn::{
    nn::LayerNorm as BurnLayerNorm,
    prelude::{Backend, Bool, Module, Tensor},
};

use super::{
    attention::{full_attention::MultiHeadAttention, MaskPolicy},
    config::ModelConfig,
    mlp::FeedForward,
    transformer::DeterministicRngContext,
};
use crate::vqgen::error::{ModelError, Result};

/// Layer normalization over the feature (last) dimension.
///
/// Thin wrapper over Burn's `LayerNorm` that checks the feature width before
/// normalizing, so a mis-sized input surfaces as `ShapeMismatch` rather than a
/// backend panic.
#[derive(Module, Debug)]
pub struct LayerNorm<B: Backend> {
    layer_norm: BurnLayerNorm<B>,
    normalized_dim: usize,
}

impl<B: Backend> LayerNorm<B> {
    pub fn new(normalized_dim: usize, eps: f64, rng_ctx: &DeterministicRngContext<B>) -> Self {
        Self {
            layer_norm: rng_ctx.create_deterministic_layer_norm(normalized_dim, eps),
            normalized_dim,
        }
    }

    pub fn forward<const D: usize>(&self, input: Tensor<B, D>) -> Result<Tensor<B, D>> {
        let dims = input.dims();
        if dims[D - 1] != self.normalized_dim {
            return Err(ModelError::shape(
                "layer norm feature dimension",
                self.normalized_dim,
                dims[D - 1],
            ));
        }
        Ok(self.layer_norm.forward(input))
    }
}

/// Pre-norm transformer block.
///
/// `x = x + attn(ln1(x))`, then `x = x + ffn(ln2(x))`. Self-attention only:
/// query, key and value are all the normalized input.
#[derive(Module, Debug)]
pub struct Block<B: Backend> {
    pub attention: MultiHeadAttention<B>,
    pub feed_forward: FeedForward<B>,
    ln1: LayerNorm<B>,
    ln2: LayerNorm<B>,
}

impl<B: Backend> Block<B> {
    /// Offsets inside a block: attention at `+100`, feed-forward at `+200`.
    pub fn new(
        config: &ModelConfig,
        rng_ctx: &DeterministicRngContext<B>,
        init_seed_offset: u64,
    ) -> Result<Self> {
        let attention = MultiHeadAttention::new(
            config.embed_dim,
            config.num_heads,
            config.attention_dropout,
            rng_ctx,
            init_seed_offset + 100,
        )?;
        let feed_forward = FeedForward::new(
            config.embed_dim,
            config.embed_dim * config.ffn_factor,
            config.dropout,
            rng_ctx,
            init_seed_offset + 200,
        )?;

        Ok(Self {
            attention,
            feed_forward,
            ln1: LayerNorm::new(config.embed_dim, config.layer_norm_eps, rng_ctx),
            ln2: LayerNorm::new(config.embed_dim, config.layer_norm_eps, rng_ctx),
        })
    }

    pub fn forward(&self, x: Tensor<B, 3>, policy: MaskPolicy) -> Result<Tensor<B, 3>> {
        let [_, len, _] = x.dims();
        let mask = policy.build::<B>(len, len, &x.device());
        self.forward_with_mask(x, mask)
    }

    /// Forward pass under an explicit `[len, len]` mask (`true` = hidden).
    pub fn forward_with_mask(&self, x: Tensor<B, 3>, mask: Tensor<B, 2, Bool>) -> Result<Tensor<B, 3>> {
        let normed = self.ln1.forward(x.clone())?;
        let attended = self
            .attention
            .forward_masked(normed.clone(), normed.clone(), normed, mask)?
            .output;
        let x = x + attended;

        let normed = self.ln2.forward(x.clone())?;
        Ok(x + self.feed_forward.forward(normed))
    }
}
