//! Drawing tokens from model probabilities, and the grid sampling pipeline.

use burn::prelude::*;
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;

use super::codec::{check_codec_compatibility, VqCodec};
use super::config::PatchGrid;
use super::loss_utils::validate_index_range;
use super::transformer::Gpt;
use crate::tensor_io::{float_values, tensor_from_i64_vec};
use crate::vqgen::error::{ModelError, Result};

/// Draw one index per row of a `[batch, vocab]` probability matrix.
///
/// Probabilities are read to the host and sampled with the caller's RNG, so a
/// fixed seed reproduces the same draws on every backend. Returns `[batch, 1]`.
pub fn sample_categorical<B: Backend, R: Rng + ?Sized>(
    probs: Tensor<B, 2>,
    rng: &mut R,
) -> Result<Tensor<B, 2, Int>> {
    let [batch, vocab] = probs.dims();
    let device = probs.device();
    let values = float_values(&probs)?;

    let mut draws = Vec::with_capacity(batch);
    for (row, weights) in values.chunks(vocab.max(1)).enumerate() {
        let dist = WeightedIndex::new(weights).map_err(|e| {
            ModelError::InvariantViolation(format!(
                "row {} is not a valid categorical distribution: {}",
                row, e
            ))
        })?;
        draws.push(dist.sample(rng) as i64);
    }

    Ok(tensor_from_i64_vec(&draws, [batch, 1], &device))
}

/// Unconditional sampling of code grids from a trained prior.
///
/// Every sample starts from the start token alone and is extended by exactly
/// `grid.num_patches()` tokens; the start token is then dropped and the rest
/// reshaped row-major into the grid.
///
/// Sampling runs on inference backends only: an autodiff model would record a
/// gradient graph and keep dropout active, so it must be converted with
/// `AutodiffModule::valid` first.
pub struct SamplingPipeline<'a, B: Backend> {
    model: &'a Gpt<B>,
    grid: PatchGrid,
    start_token: i64,
}

impl<'a, B: Backend> SamplingPipeline<'a, B> {
    pub fn new(model: &'a Gpt<B>, grid: PatchGrid, start_token: i64) -> Result<Self> {
        if B::ad_enabled() {
            return Err(ModelError::config(
                "sampling needs an inference backend; call `valid()` on the model first",
            ));
        }
        if grid.num_patches() == 0 {
            return Err(ModelError::config("patch grid is empty"));
        }
        validate_index_range(&[start_token], model.vocab_size(), "start token")?;

        Ok(Self {
            model,
            grid,
            start_token,
        })
    }

    pub fn grid(&self) -> PatchGrid {
        self.grid
    }

    /// `[num_samples, grid.height, grid.width]` sampled codebook indices.
    pub fn sample_indices<R: Rng + ?Sized>(
        &self,
        num_samples: usize,
        rng: &mut R,
    ) -> Result<Tensor<B, 3, Int>> {
        if num_samples == 0 {
            return Err(ModelError::shape("num_samples", ">= 1", 0));
        }

        let num_patches = self.grid.num_patches();
        let start = tensor_from_i64_vec(
            &vec![self.start_token; num_samples],
            [num_samples, 1],
            &self.model.device(),
        );

        log::debug!(
            "sampling {} grids of {}x{}",
            num_samples,
            self.grid.height,
            self.grid.width
        );
        let generated = self.model.generate(start, num_patches, rng)?;

        Ok(generated
            .slice([0..num_samples, 1..num_patches + 1])
            .reshape([num_samples, self.grid.height, self.grid.width]))
    }

    /// Sample index grids and decode them to images through `codec`.
    pub fn sample_images<C: VqCodec<B> + ?Sized, R: Rng + ?Sized>(
        &self,
        codec: &C,
        num_samples: usize,
        rng: &mut R,
    ) -> Result<Tensor<B, 4>> {
        check_codec_compatibility(codec, self.grid, self.model.vocab_size())?;
        let indices = self.sample_indices(num_samples, rng)?;
        codec.decode_indices(indices)
    }
}
