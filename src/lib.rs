//! vq-transformer-rs: an autoregressive transformer prior over vector-quantized
//! image-patch codes, built on Burn.

pub mod vqgen;

pub use vqgen::error::{ModelError, Result};
pub use vqgen::settings::{settings, Settings};

/// Backend-aware tensor construction and host readback
///
/// Provides helper functions for creating tensors that work with Burn 0.18's
/// Into<TensorData> trait bounds using Vec<T> + .as_slice() pattern.
pub mod tensor_io;
