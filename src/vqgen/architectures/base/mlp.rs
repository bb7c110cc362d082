//! Position-wise feed-forward network used inside every transformer block.

use burn::module::Module;
use burn::nn::Dropout;
use burn::prelude::*;
use burn::tensor::activation;

use super::transformer::{DeterministicLinear, DeterministicRngContext};
use crate::vqgen::error::{ModelError, Result};

/// Two-layer feed-forward network.
///
/// `embed_dim -> hidden_dim`, SiLU, dropout, `hidden_dim -> embed_dim`. Both
/// linear layers carry a bias. Dropout is active only on autodiff backends, so
/// inference is deterministic.
///
/// ```rust,no_run
/// # use burn::tensor::Tensor;
/// # use burn_ndarray::NdArray;
/// # use vq_transformer_rs::vqgen::architectures::base::{mlp::FeedForward, transformer::DeterministicRngContext};
/// type B = NdArray<f32>;
/// let rng_ctx = DeterministicRngContext::<B>::new(0, Default::default());
/// let ffn = FeedForward::new(64, 256, 0.1, &rng_ctx, 200).unwrap();
/// let x = Tensor::<B, 3>::zeros([2, 8, 64], rng_ctx.device());
/// let y = ffn.forward(x);
/// assert_eq!(y.dims(), [2, 8, 64]);
/// ```
#[derive(Module, Debug)]
pub struct FeedForward<B: Backend> {
    /// The first linear layer
    pub linear1: DeterministicLinear<B>,
    /// The second linear layer
    pub linear2: DeterministicLinear<B>,
    dropout: Dropout,
}

impl<B: Backend> FeedForward<B> {
    /// Create a feed-forward network with deterministic initialization.
    ///
    /// `linear1` is seeded at `seed + init_seed_offset`, `linear2` one above it.
    pub fn new(
        embed_dim: usize,
        hidden_dim: usize,
        dropout: f64,
        rng_ctx: &DeterministicRngContext<B>,
        init_seed_offset: u64,
    ) -> Result<Self> {
        if embed_dim == 0 || hidden_dim == 0 {
            return Err(ModelError::config(format!(
                "feed-forward dimensions must be positive, got {} -> {}",
                embed_dim, hidden_dim
            )));
        }
        if !(0.0..1.0).contains(&dropout) {
            return Err(ModelError::config(format!(
                "dropout must be in [0, 1), got {}",
                dropout
            )));
        }

        let seed = rng_ctx.seed.wrapping_add(init_seed_offset);
        Ok(Self {
            linear1: rng_ctx.create_deterministic_linear(embed_dim, hidden_dim, true, seed),
            linear2: rng_ctx.create_deterministic_linear(hidden_dim, embed_dim, true, seed.wrapping_add(1)),
            dropout: rng_ctx.create_deterministic_dropout(dropout),
        })
    }

    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let hidden = activation::silu(self.linear1.forward_3d(x));
        self.linear2.forward_3d(self.dropout.forward(hidden))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor_io::{float_values, tensor_from_f32_vec};
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn test_feed_forward_preserves_shape() {
        let ctx = DeterministicRngContext::<TestBackend>::new(5, Default::default());
        let ffn = FeedForward::new(16, 64, 0.0, &ctx, 200).unwrap();
        let x = ctx.randn([3, 7, 16], ctx.device());

        assert_eq!(ffn.forward(x).dims(), [3, 7, 16]);
    }

    #[test]
    fn test_feed_forward_matches_manual_computation() {
        let device = Default::default();
        // identity-ish weights so the result is easy to compute by hand
        let linear1 = DeterministicLinear::new(
            tensor_from_f32_vec::<TestBackend, 2>(&[1.0, 0.0, 0.0, 1.0], [2, 2], &device),
            None,
        );
        let linear2 = DeterministicLinear::new(
            tensor_from_f32_vec::<TestBackend, 2>(&[2.0, 0.0, 0.0, 2.0], [2, 2], &device),
            Some(tensor_from_f32_vec::<TestBackend, 1>(&[0.5, -0.5], [2], &device)),
        );
        let ctx = DeterministicRngContext::<TestBackend>::new(0, device);
        let ffn = FeedForward {
            linear1,
            linear2,
            dropout: ctx.create_deterministic_dropout(0.0),
        };

        let x = tensor_from_f32_vec::<TestBackend, 3>(&[1.0, -1.0], [1, 1, 2], ctx.device());
        let y = float_values(&ffn.forward(x)).unwrap();

        let silu = |v: f32| v / (1.0 + (-v).exp());
        assert!((y[0] - (2.0 * silu(1.0) + 0.5)).abs() < 1e-5);
        assert!((y[1] - (2.0 * silu(-1.0) - 0.5)).abs() < 1e-5);
    }

    #[test]
    fn test_feed_forward_rejects_invalid_dropout() {
        let ctx = DeterministicRngContext::<TestBackend>::new(5, Default::default());
        assert!(FeedForward::new(16, 64, 1.5, &ctx, 200).is_err());
    }
}
