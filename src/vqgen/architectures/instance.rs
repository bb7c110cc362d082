//! Backend selection and ready-built model instances.
//!
//! The CPU (`ndarray`) backend is always available; WGPU is compiled in with
//! the `wgpu` feature. Training callers use the `*AutodiffBackend` aliases,
//! sampling callers the plain ones so dropout stays inactive.

use burn::prelude::Backend;

// Always include ndarray backend as the default
use burn_autodiff::Autodiff as AutodiffWrapper;
use burn_ndarray::{NdArray, NdArrayDevice};

#[cfg(feature = "wgpu")]
use burn_wgpu::{Wgpu, WgpuDevice};

use super::base::{
    config::VQTransformerConfig,
    transformer::DeterministicRngContext,
    vq_transformer::VQTransformer,
};
use crate::vqgen::error::{ModelError, Result};

/// Backend type aliases for different compute devices
pub type CpuBackend = NdArray<f32>;

#[cfg(feature = "wgpu")]
pub type WgpuBackend = Wgpu<f32, i32>;

/// Training backend with autodiff support
pub type CpuAutodiffBackend = AutodiffWrapper<CpuBackend>;

#[cfg(feature = "wgpu")]
pub type WgpuAutodiffBackend = AutodiffWrapper<WgpuBackend>;

/// Supported backend types for runtime selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendType {
    #[default]
    Cpu,
    #[cfg(feature = "wgpu")]
    Wgpu,
}

impl BackendType {
    /// Parse a backend name as found in settings ("cpu", "ndarray", "wgpu").
    pub fn from_name(name: &str) -> Result<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "cpu" | "ndarray" => Ok(BackendType::Cpu),
            #[cfg(feature = "wgpu")]
            "wgpu" | "gpu" => Ok(BackendType::Wgpu),
            other => Err(ModelError::config(format!(
                "unknown or disabled backend `{}`",
                other
            ))),
        }
    }

    /// Get the best available backend for the current build
    pub fn best_available() -> Self {
        #[cfg(feature = "wgpu")]
        {
            return BackendType::Wgpu;
        }

        #[allow(unreachable_code)]
        BackendType::Cpu
    }

    pub fn name(&self) -> &'static str {
        match self {
            BackendType::Cpu => "cpu",
            #[cfg(feature = "wgpu")]
            BackendType::Wgpu => "wgpu",
        }
    }
}

/// Build a VQ prior on any backend from a seed.
pub fn build_vq_transformer<B: Backend>(
    config: &VQTransformerConfig,
    seed: u64,
    device: B::Device,
) -> Result<VQTransformer<B>> {
    let rng_ctx = DeterministicRngContext::<B>::new(seed, device);
    VQTransformer::new(config, &rng_ctx)
}

/// VQ prior on the CPU inference backend.
pub fn cpu_vq_transformer(config: &VQTransformerConfig, seed: u64) -> Result<VQTransformer<CpuBackend>> {
    build_vq_transformer::<CpuBackend>(config, seed, NdArrayDevice::Cpu)
}

/// VQ prior on the WGPU inference backend.
#[cfg(feature = "wgpu")]
pub fn wgpu_vq_transformer(config: &VQTransformerConfig, seed: u64) -> Result<VQTransformer<WgpuBackend>> {
    build_vq_transformer::<WgpuBackend>(config, seed, WgpuDevice::default())
}
