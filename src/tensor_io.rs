// Host <-> device helpers for tensors built from, or read back into, plain vectors.
//
// Construction goes through Vec<T> + .as_slice() to satisfy Burn 0.18's
// Into<TensorData> bounds; reads always convert to a fixed element type so the
// callers do not depend on the backend's native int/float element.

use burn::tensor::{backend::Backend, Bool, Int, Tensor, TensorData};

use crate::vqgen::error::{ModelError, Result};

/// Create f32 tensor from data slice with specified shape
///
/// # Panics
/// Panics if `data.len()` does not match the product of `shape`.
pub fn tensor_from_f32_vec<B: Backend, const D: usize>(
    data: &[f32],
    shape: [usize; D],
    device: &B::Device,
) -> Tensor<B, D> {
    let expected_size: usize = shape.iter().product();
    assert_eq!(
        data.len(),
        expected_size,
        "Data length {} doesn't match shape {:?} (expected {})",
        data.len(),
        shape,
        expected_size
    );

    Tensor::<B, D>::from_data(TensorData::new(data.to_vec(), shape), device)
}

/// Create an integer tensor from i64 data with the specified shape.
///
/// # Panics
/// Panics if `data.len()` does not match the product of `shape`.
pub fn tensor_from_i64_vec<B: Backend, const D: usize>(
    data: &[i64],
    shape: [usize; D],
    device: &B::Device,
) -> Tensor<B, D, Int> {
    let expected_size: usize = shape.iter().product();
    assert_eq!(
        data.len(),
        expected_size,
        "Data length {} doesn't match shape {:?} (expected {})",
        data.len(),
        shape,
        expected_size
    );

    let data_vec: Vec<i64> = data.to_vec();
    Tensor::<B, 1, Int>::from_ints(data_vec.as_slice(), device).reshape(shape)
}

/// Create bool tensor from data slice with specified shape
///
/// # Panics
/// Panics if `data.len()` does not match the product of `shape`.
pub fn tensor_from_bool_vec<B: Backend, const D: usize>(
    data: &[bool],
    shape: [usize; D],
    device: &B::Device,
) -> Tensor<B, D, Bool> {
    let expected_size: usize = shape.iter().product();
    assert_eq!(
        data.len(),
        expected_size,
        "Data length {} doesn't match shape {:?} (expected {})",
        data.len(),
        shape,
        expected_size
    );

    Tensor::<B, D, Bool>::from_bool(TensorData::new(data.to_vec(), shape), device)
}

/// Read an integer tensor back to the host as row-major i64 values.
pub fn int_values<B: Backend, const D: usize>(tensor: &Tensor<B, D, Int>) -> Result<Vec<i64>> {
    tensor
        .to_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| ModelError::TensorData(format!("{:?}", e)))
}

/// Read a float tensor back to the host as row-major f32 values.
pub fn float_values<B: Backend, const D: usize>(tensor: &Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .to_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| ModelError::TensorData(format!("{:?}", e)))
}

/// Read a bool tensor back to the host.
pub fn bool_values<B: Backend, const D: usize>(tensor: &Tensor<B, D, Bool>) -> Result<Vec<bool>> {
    tensor
        .to_data()
        .to_vec::<bool>()
        .map_err(|e| ModelError::TensorData(format!("{:?}", e)))
}
