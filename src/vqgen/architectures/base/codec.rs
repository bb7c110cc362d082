//! Boundary to the external vector-quantization codec.

use burn::prelude::*;

use super::config::PatchGrid;
use crate::vqgen::error::{ModelError, Result};

/// Image encoder/quantizer and decoder that the sequence prior is trained on.
///
/// Implementations own the codebook. The prior only ever sees integer indices
/// in `[0, num_codebook_embeddings())`, laid out row-major over
/// [`VqCodec::patch_grid`].
pub trait VqCodec<B: Backend> {
    /// Latent grid produced for one image.
    fn patch_grid(&self) -> PatchGrid;

    fn num_codebook_embeddings(&self) -> usize;

    /// `[batch, channels, height, width]` images to `[batch, grid.num_patches()]` indices.
    fn encode_indices(&self, images: Tensor<B, 4>) -> Result<Tensor<B, 2, Int>>;

    /// `[batch, grid.height, grid.width]` indices back to `[batch, channels, height, width]` images.
    fn decode_indices(&self, indices: Tensor<B, 3, Int>) -> Result<Tensor<B, 4>>;
}

/// Check that a codec produces the grid and codebook a prior was built for.
pub fn check_codec_compatibility<B: Backend, C: VqCodec<B> + ?Sized>(
    codec: &C,
    grid: PatchGrid,
    num_codebook_embeddings: usize,
) -> Result<()> {
    if codec.patch_grid() != grid {
        return Err(ModelError::shape(
            "codec patch grid",
            [grid.height, grid.width],
            [codec.patch_grid().height, codec.patch_grid().width],
        ));
    }
    if codec.num_codebook_embeddings() != num_codebook_embeddings {
        return Err(ModelError::config(format!(
            "codec has {} codebook entries, the prior expects {}",
            codec.num_codebook_embeddings(),
            num_codebook_embeddings
        )));
    }
    Ok(())
}
