//! Index corruption for denoising-style training of the code prior.
//!
//! Each ground-truth index is kept with probability `keep_prob`; otherwise it
//! is replaced by an index drawn uniformly from the whole codebook, which may
//! happen to equal the original. The corrupted sequence is then shifted right
//! by one behind the start token, so position `t` sees corrupted indices
//! `0..t` and is trained to predict the clean index `t`.

use burn::prelude::*;
use rand::distributions::{Bernoulli, Distribution, Uniform};
use rand::Rng;

use super::loss_utils::validate_index_range;
use crate::tensor_io::{int_values, tensor_from_bool_vec, tensor_from_i64_vec};
use crate::vqgen::error::{ModelError, Result};

/// Output of [`IndexCorruption::corrupt`].
#[derive(Debug, Clone)]
pub struct CorruptedIndices<B: Backend> {
    /// `[start] ++ noised[..len - 1]` per row; same shape as the input.
    pub inputs: Tensor<B, 2, Int>,
    /// Which original positions kept their true index, before the shift.
    pub keep_mask: Tensor<B, 2, Bool>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexCorruption {
    keep_prob: f64,
    num_codebook_embeddings: usize,
    start_token: i64,
}

impl IndexCorruption {
    /// `keep_prob` may be 0 here (every index replaced), which training
    /// configs reject but is useful for inspecting the replacement draw.
    pub fn new(keep_prob: f64, num_codebook_embeddings: usize, start_token: i64) -> Result<Self> {
        if !(0.0..=1.0).contains(&keep_prob) {
            return Err(ModelError::config(format!(
                "keep_prob must be in [0, 1], got {}",
                keep_prob
            )));
        }
        if num_codebook_embeddings == 0 {
            return Err(ModelError::config("num_codebook_embeddings must be positive"));
        }
        validate_index_range(&[start_token], num_codebook_embeddings, "start token")?;

        Ok(Self {
            keep_prob,
            num_codebook_embeddings,
            start_token,
        })
    }

    pub fn keep_prob(&self) -> f64 {
        self.keep_prob
    }

    /// Corrupt a `[batch, len]` grid of codebook indices.
    pub fn corrupt<B: Backend, R: Rng + ?Sized>(
        &self,
        indices: &Tensor<B, 2, Int>,
        rng: &mut R,
    ) -> Result<CorruptedIndices<B>> {
        let [batch, len] = indices.dims();
        if batch == 0 || len == 0 {
            return Err(ModelError::shape("indices (non-empty)", "[>=1, >=1]", [batch, len]));
        }

        let values = int_values(indices)?;
        validate_index_range(&values, self.num_codebook_embeddings, "codebook indices")?;

        let keep = Bernoulli::new(self.keep_prob)
            .map_err(|e| ModelError::config(format!("keep_prob: {}", e)))?;
        let replacement = Uniform::new(0, self.num_codebook_embeddings as i64);

        let mut keep_mask = Vec::with_capacity(values.len());
        let mut shifted = Vec::with_capacity(values.len());
        for row in values.chunks(len) {
            shifted.push(self.start_token);
            for (t, &index) in row.iter().enumerate() {
                let kept = keep.sample(rng);
                let noised = if kept { index } else { replacement.sample(rng) };
                keep_mask.push(kept);
                if t + 1 < len {
                    shifted.push(noised);
                }
            }
        }

        let kept = keep_mask.iter().filter(|&&k| k).count();
        log::trace!(
            "corrupted {} of {} indices (keep_prob={})",
            values.len() - kept,
            values.len(),
            self.keep_prob
        );

        let device = indices.device();
        Ok(CorruptedIndices {
            inputs: tensor_from_i64_vec(&shifted, [batch, len], &device),
            keep_mask: tensor_from_bool_vec(&keep_mask, [batch, len], &device),
        })
    }
}
