//! Implements standard quadratic multi-head attention.

use burn::module::Module;
use burn::nn::Dropout;
use burn::prelude::*;

use super::{check_qkv_shapes, mask::validate_mask, scaled_dot_product, Attention, MaskPolicy};
use crate::vqgen::architectures::base::transformer::{DeterministicLinear, DeterministicRngContext};
use crate::vqgen::error::{ModelError, Result};

/// Output of [`MultiHeadAttention::forward_with_attention`].
#[derive(Debug, Clone)]
pub struct AttentionOutput<B: Backend> {
    /// `[batch, query_len, embed_dim]`
    pub output: Tensor<B, 3>,
    /// `[batch, num_heads, query_len, key_len]`, post-softmax and pre-dropout.
    pub weights: Tensor<B, 4>,
}

/// Multi-head attention layer implementation
///
/// Query/key/value projections are bias-free `embed_dim -> embed_dim` maps whose
/// outputs are split into `num_heads` slices of `head_size`. The output
/// projection carries a bias and is always applied after the heads are merged.
#[derive(Module, Debug)]
pub struct MultiHeadAttention<B: Backend> {
    query: DeterministicLinear<B>,
    key: DeterministicLinear<B>,
    value: DeterministicLinear<B>,
    value_proj: DeterministicLinear<B>,
    dropout: Option<Dropout>,
    embed_dim: usize,
    num_heads: usize,
    head_size: usize,
}

impl<B: Backend> MultiHeadAttention<B> {
    /// Projections are seeded at `seed_offset + {0, 1, 2, 3}` for query, key,
    /// value and the output projection.
    pub fn new(
        embed_dim: usize,
        num_heads: usize,
        attention_dropout: f64,
        rng_ctx: &DeterministicRngContext<B>,
        seed_offset: u64,
    ) -> Result<Self> {
        if embed_dim == 0 || num_heads == 0 {
            return Err(ModelError::config(format!(
                "embed_dim ({}) and num_heads ({}) must be positive",
                embed_dim, num_heads
            )));
        }
        if embed_dim % num_heads != 0 {
            return Err(ModelError::config(format!(
                "embed_dim ({}) must be divisible by num_heads ({})",
                embed_dim, num_heads
            )));
        }
        if !(0.0..1.0).contains(&attention_dropout) {
            return Err(ModelError::config(format!(
                "attention_dropout must be in [0, 1), got {}",
                attention_dropout
            )));
        }

        let seed = rng_ctx.seed.wrapping_add(seed_offset);
        let dropout = (attention_dropout > 0.0)
            .then(|| rng_ctx.create_deterministic_dropout(attention_dropout));

        log::trace!(
            "MultiHeadAttention: embed_dim={} num_heads={} dropout={}",
            embed_dim,
            num_heads,
            attention_dropout
        );

        Ok(Self {
            query: rng_ctx.create_deterministic_linear(embed_dim, embed_dim, false, seed),
            key: rng_ctx.create_deterministic_linear(embed_dim, embed_dim, false, seed.wrapping_add(1)),
            value: rng_ctx.create_deterministic_linear(embed_dim, embed_dim, false, seed.wrapping_add(2)),
            value_proj: rng_ctx.create_deterministic_linear(embed_dim, embed_dim, true, seed.wrapping_add(3)),
            dropout,
            embed_dim,
            num_heads,
            head_size: embed_dim / num_heads,
        })
    }

    // Property accessors
    pub fn embed_dim(&self) -> usize {
        self.embed_dim
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads
    }

    pub fn head_size(&self) -> usize {
        self.head_size
    }

    pub fn forward(
        &self,
        query: Tensor<B, 3>,
        key: Tensor<B, 3>,
        value: Tensor<B, 3>,
        policy: MaskPolicy,
    ) -> Result<Tensor<B, 3>> {
        self.forward_with_attention(query, key, value, policy)
            .map(|out| out.output)
    }

    /// Forward pass that also returns the per-head attention probabilities.
    pub fn forward_with_attention(
        &self,
        query: Tensor<B, 3>,
        key: Tensor<B, 3>,
        value: Tensor<B, 3>,
        policy: MaskPolicy,
    ) -> Result<AttentionOutput<B>> {
        let [_, query_len, _] = query.dims();
        let [_, key_len, _] = key.dims();
        let mask = policy.build::<B>(query_len, key_len, &query.device());
        self.forward_masked(query, key, value, mask)
    }

    /// Forward pass under an explicit `[query_len, key_len]` mask.
    pub fn forward_masked(
        &self,
        query: Tensor<B, 3>,
        key: Tensor<B, 3>,
        value: Tensor<B, 3>,
        mask: Tensor<B, 2, Bool>,
    ) -> Result<AttentionOutput<B>> {
        let (batch, query_len, key_len) =
            check_qkv_shapes(query.dims(), key.dims(), value.dims(), self.embed_dim)?;
        validate_mask(&mask, query_len, key_len)?;

        let q = self.split_heads(self.query.forward_3d(query), batch, query_len);
        let k = self.split_heads(self.key.forward_3d(key), batch, key_len);
        let v = self.split_heads(self.value.forward_3d(value), batch, key_len);

        let (attended, weights) =
            scaled_dot_product(q, k, v, mask, self.head_size, self.dropout.as_ref());

        // [batch, heads, query_len, head_size] -> [batch, query_len, embed_dim]
        let merged = attended
            .swap_dims(1, 2)
            .reshape([batch, query_len, self.embed_dim]);

        Ok(AttentionOutput {
            output: self.value_proj.forward_3d(merged),
            weights,
        })
    }

    fn split_heads(&self, x: Tensor<B, 3>, batch: usize, len: usize) -> Tensor<B, 4> {
        x.reshape([batch, len, self.num_heads, self.head_size])
            .swap_dims(1, 2)
    }
}

impl<B: Backend> Attention<B> for MultiHeadAttention<B> {
    fn output_dim(&self) -> usize {
        self.embed_dim
    }

    fn attend(
        &self,
        query: Tensor<B, 3>,
        key: Tensor<B, 3>,
        value: Tensor<B, 3>,
        mask: Tensor<B, 2, Bool>,
    ) -> Result<Tensor<B, 3>> {
        self.forward_masked(query, key, value, mask)
            .map(|out| out.output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor_io::float_values;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn ctx() -> DeterministicRngContext<TestBackend> {
        DeterministicRngContext::new(11, Default::default())
    }

    #[test]
    fn test_divisibility_is_enforced() {
        let ctx = ctx();
        assert!(matches!(
            MultiHeadAttention::new(130, 4, 0.0, &ctx, 0),
            Err(ModelError::ConfigError(_))
        ));
        assert!(MultiHeadAttention::new(128, 4, 0.0, &ctx, 0).is_ok());
        assert!(matches!(
            MultiHeadAttention::new(16, 0, 0.0, &ctx, 0),
            Err(ModelError::ConfigError(_))
        ));
    }

    #[test]
    fn test_output_matches_query_shape_for_cross_attention() {
        let ctx = ctx();
        let mha = MultiHeadAttention::new(12, 3, 0.0, &ctx, 100).unwrap();
        let q = ctx.randn([2, 3, 12], ctx.device());
        let kv = ctx.fork(5).randn([2, 7, 12], ctx.device());

        let out = mha
            .forward_with_attention(q, kv.clone(), kv, MaskPolicy::FullVisibility)
            .unwrap();
        assert_eq!(out.output.dims(), [2, 3, 12]);
        assert_eq!(out.weights.dims(), [2, 3, 3, 7]);
    }

    #[test]
    fn test_causal_weights_per_head() {
        let ctx = ctx();
        let mha = MultiHeadAttention::new(8, 2, 0.0, &ctx, 100).unwrap();
        let x = ctx.randn([1, 5, 8], ctx.device());

        let out = mha
            .forward_with_attention(x.clone(), x.clone(), x, MaskPolicy::Causal)
            .unwrap();
        let w = float_values(&out.weights).unwrap();

        // [1, 2, 5, 5] row-major
        for (r, row) in w.chunks(5).enumerate() {
            let i = r % 5;
            let sum: f32 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-5);
            assert!(row[i + 1..].iter().all(|&p| p == 0.0));
        }
    }

    #[test]
    fn test_key_value_length_mismatch() {
        let ctx = ctx();
        let mha = MultiHeadAttention::new(8, 2, 0.0, &ctx, 100).unwrap();
        let q = ctx.randn([1, 4, 8], ctx.device());
        let k = ctx.randn([1, 4, 8], ctx.device());
        let v = ctx.randn([1, 3, 8], ctx.device());

        let err = mha.forward(q, k, v, MaskPolicy::FullVisibility).unwrap_err();
        assert!(matches!(err, ModelError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_attention_dropout_is_identity_without_autodiff() {
        let ctx = ctx();
        let plain = MultiHeadAttention::new(8, 2, 0.0, &ctx, 100).unwrap();
        let dropped = MultiHeadAttention::new(8, 2, 0.5, &ctx, 100).unwrap();
        let x = ctx.randn([2, 4, 8], ctx.device());

        let a = plain
            .forward(x.clone(), x.clone(), x.clone(), MaskPolicy::Causal)
            .unwrap();
        let b = dropped.forward(x.clone(), x.clone(), x, MaskPolicy::Causal).unwrap();

        assert_eq!(float_values(&a).unwrap(), float_values(&b).unwrap());
    }

    #[test]
    fn test_invalid_attention_dropout() {
        let ctx = ctx();
        assert!(MultiHeadAttention::new(8, 2, 1.0, &ctx, 0).is_err());
    }
}
