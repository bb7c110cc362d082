//! Autoregressive prior over VQ codebook indices.

use burn::module::{Ignored, Module};
use burn::prelude::*;
use rand::Rng;

use super::{
    codec::{check_codec_compatibility, VqCodec},
    config::{PatchGrid, VQTransformerConfig},
    corruption::{CorruptedIndices, IndexCorruption},
    sampling::SamplingPipeline,
    transformer::{DeterministicRngContext, Gpt, SequenceOutput},
};
use crate::vqgen::error::{ModelError, Result};

/// A [`Gpt`] trained to predict clean codebook indices from corrupted ones,
/// and sampled to produce new index grids for a codec's decoder.
#[derive(Module, Debug)]
pub struct VQTransformer<B: Backend> {
    transformer: Gpt<B>,
    config: Ignored<VQTransformerConfig>,
    grid: Ignored<PatchGrid>,
}

impl<B: Backend> VQTransformer<B> {
    pub fn new(config: &VQTransformerConfig, rng_ctx: &DeterministicRngContext<B>) -> Result<Self> {
        config.validate_consistent()?;
        let grid = config.patch_grid()?;
        let transformer = Gpt::new(&config.transformer, rng_ctx)?;

        log::info!(
            "VQTransformer: {}x{} patch grid, {} codebook entries, keep_prob={}, {} parameters",
            grid.height,
            grid.width,
            config.num_codebook_embeddings(),
            config.keep_prob,
            transformer.num_params()
        );

        Ok(Self {
            transformer,
            config: Ignored(config.clone()),
            grid: Ignored(grid),
        })
    }

    pub fn transformer(&self) -> &Gpt<B> {
        &self.transformer
    }

    pub fn config(&self) -> &VQTransformerConfig {
        &self.config
    }

    pub fn patch_grid(&self) -> PatchGrid {
        *self.grid
    }

    pub fn num_patches(&self) -> usize {
        self.grid.num_patches()
    }

    pub fn corruption(&self) -> Result<IndexCorruption> {
        IndexCorruption::new(
            self.config.keep_prob,
            self.config.num_codebook_embeddings(),
            self.config.start_token,
        )
    }

    /// The corruption `forward` applies, exposed for inspection.
    pub fn corrupt_indices<R: Rng + ?Sized>(
        &self,
        indices: &Tensor<B, 2, Int>,
        rng: &mut R,
    ) -> Result<CorruptedIndices<B>> {
        self.corruption()?.corrupt(indices, rng)
    }

    /// Training step on a `[batch, num_patches]` grid of ground-truth indices.
    ///
    /// The model reads corrupted, shifted indices and is scored against the
    /// clean ones.
    pub fn forward<R: Rng + ?Sized>(
        &self,
        indices: Tensor<B, 2, Int>,
        rng: &mut R,
    ) -> Result<SequenceOutput<B>> {
        let [batch, len] = indices.dims();
        if len != self.num_patches() {
            return Err(ModelError::shape(
                "codebook indices",
                [batch, self.num_patches()],
                [batch, len],
            ));
        }

        let corrupted = self.corrupt_indices(&indices, rng)?;
        self.transformer.forward(corrupted.inputs, Some(indices))
    }

    /// Encode `images` with `codec` and run [`VQTransformer::forward`] on the indices.
    pub fn forward_images<C: VqCodec<B> + ?Sized, R: Rng + ?Sized>(
        &self,
        codec: &C,
        images: Tensor<B, 4>,
        rng: &mut R,
    ) -> Result<SequenceOutput<B>> {
        check_codec_compatibility(codec, self.patch_grid(), self.config.num_codebook_embeddings())?;
        let indices = codec.encode_indices(images)?;
        self.forward(indices, rng)
    }

    pub fn sampling_pipeline(&self) -> Result<SamplingPipeline<'_, B>> {
        SamplingPipeline::new(&self.transformer, self.patch_grid(), self.config.start_token)
    }

    /// `[num_samples, grid.height, grid.width]` freshly sampled index grids.
    ///
    /// Fails with `ConfigError` on an autodiff backend; sample from
    /// `self.valid()` instead.
    pub fn sample_indices<R: Rng + ?Sized>(
        &self,
        num_samples: usize,
        rng: &mut R,
    ) -> Result<Tensor<B, 3, Int>> {
        self.sampling_pipeline()?.sample_indices(num_samples, rng)
    }

    /// Sample index grids and decode them to images through `codec`.
    /// Inference backends only, as for [`VQTransformer::sample_indices`].
    pub fn sample<C: VqCodec<B> + ?Sized, R: Rng + ?Sized>(
        &self,
        codec: &C,
        num_samples: usize,
        rng: &mut R,
    ) -> Result<Tensor<B, 4>> {
        self.sampling_pipeline()?.sample_images(codec, num_samples, rng)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor_io::tensor_from_i64_vec;
    use crate::vqgen::architectures::base::config::ModelConfig;
    use burn_ndarray::NdArray;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    type TestBackend = NdArray<f32>;

    fn tiny_config() -> VQTransformerConfig {
        VQTransformerConfig {
            input_res: [16, 16],
            patch_size: 4,
            num_downsample_layers: 1,
            transformer: ModelConfig {
                context_window: 8,
                embed_dim: 16,
                num_heads: 2,
                vocab_size: 12,
                num_layers: 2,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_forward_returns_logits_and_loss() {
        let ctx = DeterministicRngContext::<TestBackend>::new(0, Default::default());
        let model = VQTransformer::new(&tiny_config(), &ctx).unwrap();
        assert_eq!(model.patch_grid(), PatchGrid::new(2, 2));

        let indices = tensor_from_i64_vec::<TestBackend, 2>(&[1, 2, 3, 4, 11, 10, 9, 8], [2, 4], ctx.device());
        let out = model.forward(indices, &mut StdRng::seed_from_u64(5)).unwrap();

        assert_eq!(out.logits.dims(), [2, 4, 12]);
        assert!(out.loss.is_some());
    }

    #[test]
    fn test_forward_rejects_wrong_grid_length() {
        let ctx = DeterministicRngContext::<TestBackend>::new(0, Default::default());
        let model = VQTransformer::new(&tiny_config(), &ctx).unwrap();
        let indices = tensor_from_i64_vec::<TestBackend, 2>(&[1, 2, 3], [1, 3], ctx.device());

        assert!(matches!(
            model.forward(indices, &mut StdRng::seed_from_u64(5)),
            Err(ModelError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_sample_indices_shape() {
        let ctx = DeterministicRngContext::<TestBackend>::new(0, Default::default());
        let model = VQTransformer::new(&tiny_config(), &ctx).unwrap();

        let grids = model.sample_indices(3, &mut StdRng::seed_from_u64(1)).unwrap();
        assert_eq!(grids.dims(), [3, 2, 2]);
    }
}
